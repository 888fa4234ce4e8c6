//! Entity repositories.
//!
//! This crate provides:
//! - Repository contracts for uploaded files, clips and user credits
//! - Firestore REST implementations (service account auth via gcp_auth)
//! - Atomic credit debit (optimistic locking) and increment (server transform)
//! - In-memory implementations for tests and local runs

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod repos;
pub mod repository;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use memory::{MemoryClipRepository, MemoryCreditRepository, MemoryFileRepository};
pub use repos::{FirestoreClipRepository, FirestoreCreditRepository, FirestoreFileRepository};
pub use repository::{ClipRepository, CreditRepository, DebitOutcome, FileRepository};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
