//! Artifact storage.
//!
//! This crate provides:
//! - The `ArtifactStore` contract used by admission and the worker
//! - A Cloudflare R2 (S3-compatible) implementation
//! - An in-memory implementation for tests and local runs

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{R2Settings, R2Store};
pub use error::{StorageError, StorageOp, StorageResult};
pub use memory::MemoryStore;
pub use store::{file_name_of, parent_folder, upload_key, ArtifactStore};
