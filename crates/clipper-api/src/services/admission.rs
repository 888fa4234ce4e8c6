//! Upload admission.
//!
//! Stores the object, records it, and queues its processing job. An upload
//! is never left stored but unqueued: if the job cannot be published after
//! the configured attempts, the record and the object are both removed and
//! the caller gets an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use validator::Validate;

use clipper_firestore::FileRepository;
use clipper_models::{is_allowed_video_type, FileStatus, UploadedFile, VideoConfig, VideoProcessingMessage};
use clipper_queue::MessagePublisher;
use clipper_storage::ArtifactStore;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A validated-on-admit upload request.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub user_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub config: VideoConfig,
}

impl NewUpload {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Check everything that can be checked before a side effect.
    pub fn validate(&self, max_size: u64) -> ApiResult<()> {
        if self.file_name.trim().is_empty() {
            return Err(ApiError::bad_request("File name is required"));
        }
        if self.data.is_empty() {
            return Err(ApiError::bad_request("File is empty"));
        }
        if self.size() > max_size {
            return Err(ApiError::PayloadTooLarge {
                size: self.size(),
                max: max_size,
            });
        }
        if !is_allowed_video_type(&self.content_type) {
            return Err(ApiError::UnsupportedMediaType(self.content_type.clone()));
        }
        self.config.validate()?;
        Ok(())
    }
}

/// Runs the store, record, publish sequence with compensation.
#[derive(Clone)]
pub struct AdmissionService {
    files: Arc<dyn FileRepository>,
    store: Arc<dyn ArtifactStore>,
    publisher: MessagePublisher,
    max_upload_size: u64,
    publish_attempts: u32,
    publish_backoff: Duration,
}

impl AdmissionService {
    pub fn new(
        files: Arc<dyn FileRepository>,
        store: Arc<dyn ArtifactStore>,
        publisher: MessagePublisher,
        config: &ApiConfig,
    ) -> Self {
        Self {
            files,
            store,
            publisher,
            max_upload_size: config.max_upload_size,
            publish_attempts: config.publish_attempts.max(1),
            publish_backoff: config.publish_backoff,
        }
    }

    /// Admit an upload. On success the returned record is `queued` (or
    /// `uploaded` if only the status write failed; the job is queued either way).
    pub async fn admit(&self, upload: NewUpload) -> ApiResult<UploadedFile> {
        upload.validate(self.max_upload_size)?;

        let size = upload.size();
        let path = self
            .store
            .upload(upload.data, &upload.file_name, &upload.user_id, &upload.content_type)
            .await?;

        let mut file = UploadedFile::new(
            upload.user_id,
            upload.file_name,
            path,
            size,
            upload.content_type,
        );

        if let Err(e) = self.files.create(&file).await {
            error!(file_path = %file.file_path, "Failed to record upload: {}", e);
            self.delete_object(&file.file_path).await;
            return Err(e.into());
        }

        self.enqueue(&file, upload.config).await?;

        match self
            .files
            .update_status(&file.id, FileStatus::Queued, None)
            .await
        {
            Ok(true) => file.status = FileStatus::Queued,
            // A worker picked the job up first; its status stands
            Ok(false) => {
                debug!(file_id = %file.id, "Upload already past queued");
                file.status = FileStatus::Queued;
            }
            Err(e) => warn!(file_id = %file.id, "Failed to mark upload queued: {}", e),
        }

        info!(
            file_id = %file.id,
            user_id = %file.user_id,
            size,
            "Upload admitted"
        );
        Ok(file)
    }

    /// Publish the job, retrying with a fixed backoff. Rolls the upload back
    /// when every attempt fails.
    async fn enqueue(&self, file: &UploadedFile, config: VideoConfig) -> ApiResult<()> {
        let message = VideoProcessingMessage {
            file_id: file.id.clone(),
            user_id: file.user_id.clone(),
            file_path: file.file_path.clone(),
            config,
        };

        let mut last_error = None;
        for attempt in 1..=self.publish_attempts {
            match self.publisher.publish_video_processing(&message).await {
                Ok(message_id) => {
                    info!(file_id = %file.id, message_id = %message_id, attempt, "Job queued");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        file_id = %file.id,
                        attempt,
                        max_attempts = self.publish_attempts,
                        "Failed to queue job: {}",
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.publish_attempts {
                        tokio::time::sleep(self.publish_backoff).await;
                    }
                }
            }
        }

        self.compensate(file).await;

        let reason = last_error.map_or_else(|| "no publish attempts".to_string(), |e| e.to_string());
        Err(ApiError::AdmissionFailed(reason))
    }

    /// Remove the record and the object of an upload that could not be queued.
    async fn compensate(&self, file: &UploadedFile) {
        error!(
            file_id = %file.id,
            user_id = %file.user_id,
            "Job could not be queued, rolling back upload"
        );
        metrics::record_admission_compensation();

        if let Err(e) = self.files.delete(&file.id).await {
            error!(file_id = %file.id, "Failed to delete upload record during rollback: {}", e);
        }
        self.delete_object(&file.file_path).await;
    }

    async fn delete_object(&self, path: &str) {
        if let Err(e) = self.store.delete(path).await {
            error!(file_path = %path, "Failed to delete stored upload: {}", e);
        }
    }
}
