//! Structured job logging.

use tracing::{error, info, warn, Span};

use clipper_models::FileId;

/// Logs job lifecycle events with the file and owner attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    file_id: String,
    user_id: String,
}

impl JobLogger {
    pub fn new(file_id: &FileId, user_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            user_id = %self.user_id,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            user_id = %self.user_id,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            file_id = %self.file_id,
            user_id = %self.user_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            file_id = %self.file_id,
            user_id = %self.user_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            user_id = %self.user_id,
            "Job completed: {}", message
        );
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Span covering one job run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            file_id = %self.file_id,
            user_id = %self.user_id
        )
    }
}
