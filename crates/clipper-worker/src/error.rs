//! Worker error types.

use clipper_models::FileId;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Uploaded file not found: {0}")]
    FileNotFound(FileId),

    #[error("File {file_id} is not owned by user {user_id}")]
    OwnerMismatch { file_id: FileId, user_id: String },

    #[error("Processing failed: {0}")]
    Processing(#[from] clipper_processing::ProcessingError),

    #[error("No clips produced for file {0}")]
    NoArtifacts(FileId),

    /// A job failure whose credit refund could not be confirmed either.
    #[error("{cause}; refund failed: {refund}")]
    RefundFailed {
        cause: Box<WorkerError>,
        refund: clipper_firestore::FirestoreError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] clipper_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] clipper_firestore::FirestoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] clipper_queue::QueueError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Attach a refund failure to this error, if there was one.
    pub fn with_refund_result(self, refund: Result<u32, clipper_firestore::FirestoreError>) -> Self {
        match refund {
            Ok(_) => self,
            Err(refund) => Self::RefundFailed {
                cause: Box::new(self),
                refund,
            },
        }
    }

    /// True when the credit refund for this failure could not be confirmed.
    pub fn refund_failed(&self) -> bool {
        matches!(self, WorkerError::RefundFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_firestore::FirestoreError;

    #[test]
    fn test_refund_failure_augments_message() {
        let err = WorkerError::NoArtifacts(FileId::from("f1"))
            .with_refund_result(Err(FirestoreError::request_failed("down")));
        assert!(err.refund_failed());
        let msg = err.to_string();
        assert!(msg.contains("No clips produced for file f1"));
        assert!(msg.contains("refund failed"));

        let err = WorkerError::NoArtifacts(FileId::from("f1")).with_refund_result(Ok(5));
        assert!(!err.refund_failed());
    }
}
