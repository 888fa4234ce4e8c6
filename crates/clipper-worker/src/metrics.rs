//! Worker metrics.

use std::net::SocketAddr;

use clipper_models::FileStatus;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

pub mod names {
    pub const JOBS_TOTAL: &str = "clipper_jobs_total";
    pub const REFUND_FAILURES_TOTAL: &str = "clipper_refund_failures_total";
    pub const DISCOVERY_ATTEMPTS: &str = "clipper_discovery_attempts";
    pub const CLIPS_SAVED_TOTAL: &str = "clipper_clips_saved_total";
}

/// Serve Prometheus metrics on `0.0.0.0:{port}`.
pub fn init_exporter(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Count a job reaching a terminal status.
pub fn record_job(status: FileStatus) {
    counter!(names::JOBS_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_refund_failure() {
    counter!(names::REFUND_FAILURES_TOTAL).increment(1);
}

/// Listings needed before clips showed up (or attempts exhausted).
pub fn record_discovery_attempts(attempts: u32) {
    histogram!(names::DISCOVERY_ATTEMPTS).record(attempts as f64);
}

pub fn record_clips_saved(count: u32) {
    counter!(names::CLIPS_SAVED_TOTAL).increment(count as u64);
}
