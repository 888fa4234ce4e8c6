//! Durable job and status queues over Redis Streams.
//!
//! This crate provides:
//! - The `Broker` contract: durable publish, manual ack, reject by policy
//! - A Redis Streams broker (consumer groups, pending-entry reclaim)
//! - An in-memory broker for tests
//! - Typed publishers for the job, status and email queues
//! - A prefetch-bounded consumer that runs one task per delivery

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod queue;
pub mod streams;

pub use broker::{Broker, Delivery};
pub use consumer::{ConsumerOptions, MessageHandler, QueueConsumer};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryBroker;
pub use publisher::{MessagePublisher, StatusPublisher};
pub use queue::{FailurePolicy, QueueConfig, QueueName};
pub use streams::RedisBroker;
