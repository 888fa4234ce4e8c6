//! Client for the external clip processing service.
//!
//! The service takes a stored object path and a configuration, renders clips
//! and writes them straight into storage. Nothing is returned besides an
//! acknowledgment, so callers discover outputs by listing storage afterwards.

pub mod client;
pub mod error;

use async_trait::async_trait;
use clipper_models::VideoConfig;

pub use client::{HttpProcessingClient, ProcessingConfig};
pub use error::{ProcessingError, ProcessingResult};

/// One blocking processing call per job.
#[async_trait]
pub trait ProcessingService: Send + Sync {
    /// Process the object at `storage_path`. Returns once the service has
    /// finished writing its outputs.
    async fn process(&self, storage_path: &str, config: &VideoConfig) -> ProcessingResult<()>;
}
