//! Clip processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipper_firestore::{
    FirestoreClient, FirestoreClipRepository, FirestoreCreditRepository, FirestoreFileRepository,
};
use clipper_processing::HttpProcessingClient;
use clipper_queue::{
    Broker, MessagePublisher, QueueConfig, QueueName, RedisBroker, StatusPublisher,
};
use clipper_storage::R2Store;
use clipper_worker::{metrics, JobDependencies, JobExecutor, JobProcessor, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipper=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting clipper-worker");

    if let Err(e) = run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_exporter(port)?;
        info!("Prometheus metrics on port {}", port);
    }

    let queue_config = QueueConfig::from_env()?;
    let options = {
        let mut options = queue_config.consumer_options(QueueName::VideoProcessing);
        options.drain_timeout = config.shutdown_timeout;
        options
    };

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(queue_config).await?);
    let firestore = FirestoreClient::from_env()?;
    let processing = HttpProcessingClient::from_env()?;

    let deps = JobDependencies {
        files: Arc::new(FirestoreFileRepository::new(firestore.clone())),
        clips: Arc::new(FirestoreClipRepository::new(firestore.clone())),
        credits: Arc::new(FirestoreCreditRepository::new(firestore)),
        store: Arc::new(R2Store::from_env()?),
        processing: Arc::new(processing),
        status: StatusPublisher::new(MessagePublisher::new(Arc::clone(&broker))),
    };
    let processor = Arc::new(JobProcessor::new(deps, &config));

    let executor = Arc::new(JobExecutor::new(broker, processor, options));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_executor.shutdown();
    });

    executor.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
