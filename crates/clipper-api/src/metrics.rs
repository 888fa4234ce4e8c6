//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ApiError, ApiResult};

/// Install the Prometheus recorder.
/// Returns a handle that renders the `/metrics` page.
pub fn init_metrics() -> ApiResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::config_error(format!("Failed to install Prometheus recorder: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "clipper_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clipper_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "clipper_http_requests_in_flight";

    // Admission metrics
    pub const UPLOADS_TOTAL: &str = "clipper_uploads_total";
    pub const UPLOAD_BYTES: &str = "clipper_upload_bytes";
    pub const ADMISSION_COMPENSATIONS_TOTAL: &str = "clipper_admission_compensations_total";

    // Live notification metrics
    pub const LIVE_CONNECTIONS: &str = "clipper_live_connections";
    pub const LIVE_EVENTS_SENT_TOTAL: &str = "clipper_live_events_sent_total";
    pub const LIVE_EVENTS_DROPPED_TOTAL: &str = "clipper_live_events_dropped_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an upload by outcome (`queued`, `rejected`, `rolled_back`).
pub fn record_upload(outcome: &'static str, bytes: u64) {
    counter!(names::UPLOADS_TOTAL, "outcome" => outcome).increment(1);
    if outcome == "queued" {
        histogram!(names::UPLOAD_BYTES).record(bytes as f64);
    }
}

/// Record an upload rolled back because its job could not be queued.
pub fn record_admission_compensation() {
    counter!(names::ADMISSION_COMPENSATIONS_TOTAL).increment(1);
}

pub fn set_live_connections(count: usize) {
    gauge!(names::LIVE_CONNECTIONS).set(count as f64);
}

pub fn record_live_event_sent() {
    counter!(names::LIVE_EVENTS_SENT_TOTAL).increment(1);
}

/// Record an event dropped because a connection's buffer was full.
pub fn record_live_event_dropped() {
    counter!(names::LIVE_EVENTS_DROPPED_TOTAL).increment(1);
}

/// Collapse per-entity path segments so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut after_clips = false;
    for segment in path.split('/') {
        if after_clips && !segment.is_empty() && segment != "me" {
            out.push(":clip_id");
        } else {
            out.push(segment);
        }
        after_clips = segment == "clips";
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
