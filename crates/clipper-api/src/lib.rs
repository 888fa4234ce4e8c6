//! Upload admission and live status API.
//!
//! This crate provides:
//! - Multipart upload admission with publish retry and rollback
//! - File and clip listings, signed clip URLs and clip download
//! - Server-Sent Events status stream fed by the `status_update` queue
//! - JWT authentication (header, cookie or query token)
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AuthUser, Claims, JwtVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use fanout::{LiveNotifier, Subscription};
pub use routes::create_router;
pub use services::{AdmissionService, NewUpload, StatusRelay, StatusRelayWorker};
pub use state::{AppState, Backends};
