//! Clip processing worker.
//!
//! This crate provides:
//! - The per-job state machine (debit, process, discover, persist, refund)
//! - Credit refunds with bounded retry
//! - Clip discovery over eventually consistent storage
//! - The executor that feeds jobs from the queue

pub mod config;
pub mod credits;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;

pub use config::WorkerConfig;
pub use credits::{CreditLedger, JOB_CREDIT_COST};
pub use discovery::ArtifactDiscovery;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, VideoJobHandler};
pub use logging::JobLogger;
pub use processor::{JobDependencies, JobOutcome, JobProcessor};
