//! Processing service HTTP client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use clipper_models::VideoConfig;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, ProcessingResult};
use crate::ProcessingService;

/// Configuration for the processing client.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Endpoint that accepts processing requests
    pub url: String,
    /// Bearer token for the endpoint
    pub token: String,
    /// Whole-request timeout; processing holds the connection until done
    pub timeout: Duration,
}

impl ProcessingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ProcessingResult<Self> {
        let url = std::env::var("PROCESSING_URL")
            .map_err(|_| ProcessingError::not_configured("PROCESSING_URL not set"))?;
        let token = std::env::var("PROCESSING_TOKEN")
            .map_err(|_| ProcessingError::not_configured("PROCESSING_TOKEN not set"))?;

        Ok(Self {
            url,
            token,
            timeout: Duration::from_secs(
                std::env::var("PROCESSING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        })
    }
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    storage_path: &'a str,
    config: &'a VideoConfig,
}

/// HTTP client for the processing service.
///
/// Calls are not retried: a repeated call would render the same clips twice.
pub struct HttpProcessingClient {
    http: Client,
    config: ProcessingConfig,
}

impl HttpProcessingClient {
    pub fn new(config: ProcessingConfig) -> ProcessingResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProcessingError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProcessingResult<Self> {
        Self::new(ProcessingConfig::from_env()?)
    }
}

#[async_trait]
impl ProcessingService for HttpProcessingClient {
    async fn process(&self, storage_path: &str, config: &VideoConfig) -> ProcessingResult<()> {
        debug!(storage_path = %storage_path, "Sending processing request to {}", self.config.url);
        let started = Instant::now();

        let response = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&ProcessRequest {
                storage_path,
                config,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessingError::Timeout(self.config.timeout.as_secs())
                } else {
                    ProcessingError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(storage_path = %storage_path, status = status.as_u16(), "Processing service rejected request");
            return Err(ProcessingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            storage_path = %storage_path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processing service finished"
        );
        Ok(())
    }
}
