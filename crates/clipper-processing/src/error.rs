//! Processing client error types.

use thiserror::Error;

pub type ProcessingResult<T> = Result<T, ProcessingError>;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Processing service not configured: {0}")]
    NotConfigured(String),

    #[error("Processing service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProcessingError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }
}
