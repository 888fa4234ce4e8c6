//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Storage listings made while waiting for clips to appear
    pub listing_attempts: u32,
    /// Pause between storage listings
    pub listing_delay: Duration,
    /// Refund attempts before giving up
    pub refund_attempts: u32,
    /// Pause between refund attempts
    pub refund_backoff: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus exporter; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listing_attempts: 3,
            listing_delay: Duration::from_secs(2),
            refund_attempts: 3,
            refund_backoff: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            listing_attempts: std::env::var("WORKER_LISTING_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3)
                .max(1),
            listing_delay: Duration::from_millis(
                std::env::var("WORKER_LISTING_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            refund_attempts: std::env::var("WORKER_REFUND_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3)
                .max(1),
            refund_backoff: Duration::from_millis(
                std::env::var("WORKER_REFUND_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}
