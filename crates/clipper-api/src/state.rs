//! Application state.

use std::sync::Arc;

use clipper_firestore::{
    ClipRepository, FileRepository, FirestoreClient, FirestoreClipRepository,
    FirestoreFileRepository,
};
use clipper_queue::{Broker, MessagePublisher, QueueConfig, RedisBroker};
use clipper_storage::{ArtifactStore, R2Store};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::fanout::LiveNotifier;
use crate::services::AdmissionService;

/// External systems the API talks to.
#[derive(Clone)]
pub struct Backends {
    pub files: Arc<dyn FileRepository>,
    pub clips: Arc<dyn ClipRepository>,
    pub store: Arc<dyn ArtifactStore>,
    pub broker: Arc<dyn Broker>,
}

impl Backends {
    /// Firestore, R2 and Redis from the environment.
    pub async fn from_env(queue_config: QueueConfig) -> ApiResult<Self> {
        let firestore = FirestoreClient::from_env()?;
        let store = R2Store::from_env()?;
        let broker = RedisBroker::connect(queue_config).await?;

        Ok(Self {
            files: Arc::new(FirestoreFileRepository::new(firestore.clone())),
            clips: Arc::new(FirestoreClipRepository::new(firestore)),
            store: Arc::new(store),
            broker: Arc::new(broker),
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub files: Arc<dyn FileRepository>,
    pub clips: Arc<dyn ClipRepository>,
    pub store: Arc<dyn ArtifactStore>,
    pub broker: Arc<dyn Broker>,
    pub admission: AdmissionService,
    pub notifier: Arc<LiveNotifier>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(config: ApiConfig, backends: Backends) -> Self {
        let admission = AdmissionService::new(
            Arc::clone(&backends.files),
            Arc::clone(&backends.store),
            MessagePublisher::new(Arc::clone(&backends.broker)),
            &config,
        );
        let notifier = Arc::new(LiveNotifier::new(config.live_channel_capacity));
        let jwt = Arc::new(JwtVerifier::new(&config.jwt_secret));

        Self {
            config,
            files: backends.files,
            clips: backends.clips,
            store: backends.store,
            broker: backends.broker,
            admission,
            notifier,
            jwt,
        }
    }
}
