//! Liveness and readiness checks.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;

/// Liveness: the process is up.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Broker round-trip result.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BrokerCheck {
    Ok { latency_ms: u64 },
    Error { error: String },
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub redis: BrokerCheck,
    /// Open event streams on this replica.
    pub live_connections: usize,
}

/// Readiness: 503 while the queue broker is unreachable.
pub async fn ready(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    let redis = match state.broker.ping().await {
        Ok(()) => BrokerCheck::Ok {
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Err(e) => BrokerCheck::Error {
            error: e.to_string(),
        },
    };

    let (code, status) = match redis {
        BrokerCheck::Ok { .. } => (StatusCode::OK, "ready"),
        BrokerCheck::Error { .. } => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };
    let body = Readiness {
        status,
        checks: ReadinessChecks {
            redis,
            live_connections: state.notifier.total_connections(),
        },
    };

    (code, Json(body)).into_response()
}
