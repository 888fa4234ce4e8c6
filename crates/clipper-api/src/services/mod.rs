//! Business logic services.

pub mod admission;
pub mod status_relay;

pub use admission::{AdmissionService, NewUpload};
pub use status_relay::{StatusRelay, StatusRelayWorker};
