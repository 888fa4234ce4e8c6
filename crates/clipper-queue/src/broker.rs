//! Broker contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{QueueError, QueueResult};
use crate::queue::QueueName;

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: QueueName,
    /// Broker-assigned message ID
    pub id: String,
    pub body: Vec<u8>,
    /// True when the message was taken over from another consumer
    pub redelivered: bool,
}

impl Delivery {
    /// Decode the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| QueueError::Malformed {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Durable, manually acknowledged message transport.
///
/// A fetched message stays pending until it is acked or rejected. If its
/// consumer dies first, `reclaim` hands it to another consumer.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Round-trip check used by readiness.
    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Make sure the queue and this service's consumer group exist.
    async fn declare(&self, queue: QueueName) -> QueueResult<()>;

    /// Durably append a message. Returns the message ID.
    async fn publish(&self, queue: QueueName, body: Vec<u8>) -> QueueResult<String>;

    /// Take up to `max` new messages, waiting at most `block` for the first.
    async fn fetch(
        &self,
        queue: QueueName,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>>;

    /// Remove a handled message permanently.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Give up on a message according to the configured failure policy.
    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Take over messages left pending for at least `min_idle`.
    async fn reclaim(
        &self,
        queue: QueueName,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>>;
}
