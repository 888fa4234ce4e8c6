//! In-memory broker.
//!
//! Mirrors the Redis Streams semantics closely enough for tests: fetched
//! messages stay pending until acked or rejected, and `reclaim` hands back
//! pending messages that have been idle long enough.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{Broker, Delivery};
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailurePolicy, QueueName};

#[derive(Debug)]
struct Pending {
    delivery: Delivery,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: HashMap<QueueName, VecDeque<Delivery>>,
    pending: HashMap<QueueName, Vec<Pending>>,
    published: HashMap<QueueName, Vec<Vec<u8>>>,
    acked: HashMap<QueueName, Vec<String>>,
    rejected: HashMap<QueueName, Vec<(String, String)>>,
    dead_letters: HashMap<QueueName, Vec<Vec<u8>>>,
}

/// Broker that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    notify: Notify,
    policy: FailurePolicy,
    next_id: AtomicU64,
    publish_failures: AtomicU32,
    publish_attempts: AtomicU32,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` publishes.
    pub fn fail_publishes(&self, n: u32) {
        self.publish_failures.store(n, Ordering::SeqCst);
    }

    /// Publish calls made so far, failed ones included.
    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Bodies successfully published to `queue`, in order.
    pub fn published(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.state().published.get(&queue).cloned().unwrap_or_default()
    }

    /// Published bodies decoded as `T`. Bodies that do not decode are skipped.
    pub fn decode_published<T: DeserializeOwned>(&self, queue: QueueName) -> Vec<T> {
        self.published(queue)
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    pub fn acked(&self, queue: QueueName) -> Vec<String> {
        self.state().acked.get(&queue).cloned().unwrap_or_default()
    }

    /// Rejected message IDs with their reasons.
    pub fn rejected(&self, queue: QueueName) -> Vec<(String, String)> {
        self.state().rejected.get(&queue).cloned().unwrap_or_default()
    }

    pub fn dead_letters(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.state()
            .dead_letters
            .get(&queue)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pending_count(&self, queue: QueueName) -> usize {
        self.state().pending.get(&queue).map_or(0, Vec::len)
    }

    fn take_ready(&self, queue: QueueName, max: usize) -> Vec<Delivery> {
        let mut state = self.state();
        let taken: Vec<Delivery> = match state.ready.get_mut(&queue) {
            Some(ready) => {
                let n = max.min(ready.len());
                ready.drain(..n).collect()
            }
            None => Vec::new(),
        };

        let now = Instant::now();
        let pending = state.pending.entry(queue).or_default();
        for delivery in &taken {
            pending.push(Pending {
                delivery: delivery.clone(),
                delivered_at: now,
            });
        }
        taken
    }

    fn settle(&self, delivery: &Delivery) -> bool {
        let mut state = self.state();
        let Some(pending) = state.pending.get_mut(&delivery.queue) else {
            return false;
        };
        let before = pending.len();
        pending.retain(|p| p.delivery.id != delivery.id);
        before != pending.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, queue: QueueName) -> QueueResult<()> {
        self.state().ready.entry(queue).or_default();
        Ok(())
    }

    async fn publish(&self, queue: QueueName, body: Vec<u8>) -> QueueResult<String> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::publish_failed("injected publish failure"));
        }

        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut state = self.state();
            state
                .published
                .entry(queue)
                .or_default()
                .push(body.clone());
            state.ready.entry(queue).or_default().push_back(Delivery {
                queue,
                id: id.clone(),
                body,
                redelivered: false,
            });
        }
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn fetch(
        &self,
        queue: QueueName,
        _consumer: &str,
        max: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking, so a publish in between is not missed
            let notified = self.notify.notified();
            let taken = self.take_ready(queue, max);
            if !taken.is_empty() {
                return Ok(taken);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        if self.settle(delivery) {
            self.state()
                .acked
                .entry(delivery.queue)
                .or_default()
                .push(delivery.id.clone());
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        if !self.settle(delivery) {
            return Ok(());
        }
        let mut state = self.state();
        state
            .rejected
            .entry(delivery.queue)
            .or_default()
            .push((delivery.id.clone(), reason.to_string()));
        if self.policy == FailurePolicy::DeadLetter {
            state
                .dead_letters
                .entry(delivery.queue)
                .or_default()
                .push(delivery.body.clone());
        }
        Ok(())
    }

    async fn reclaim(
        &self,
        queue: QueueName,
        _consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let now = Instant::now();
        let mut state = self.state();
        let Some(pending) = state.pending.get_mut(&queue) else {
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for entry in pending.iter_mut() {
            if claimed.len() >= max {
                break;
            }
            if now.duration_since(entry.delivered_at) >= min_idle {
                entry.delivered_at = now;
                entry.delivery.redelivered = true;
                claimed.push(entry.delivery.clone());
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetched_messages_stay_pending_until_acked() {
        let broker = MemoryBroker::new();
        broker
            .publish(QueueName::VideoProcessing, b"{}".to_vec())
            .await
            .unwrap();

        let fetched = broker
            .fetch(QueueName::VideoProcessing, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(broker.pending_count(QueueName::VideoProcessing), 1);

        broker.ack(&fetched[0]).await.unwrap();
        assert_eq!(broker.pending_count(QueueName::VideoProcessing), 0);
        assert_eq!(broker.acked(QueueName::VideoProcessing), vec![fetched[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_fetch_respects_max() {
        let broker = MemoryBroker::new();
        for _ in 0..5 {
            broker
                .publish(QueueName::StatusUpdate, b"{}".to_vec())
                .await
                .unwrap();
        }

        let first = broker
            .fetch(QueueName::StatusUpdate, "c1", 3, Duration::ZERO)
            .await
            .unwrap();
        let second = broker
            .fetch(QueueName::StatusUpdate, "c1", 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_returns_idle_pending_messages() {
        let broker = MemoryBroker::new();
        broker
            .publish(QueueName::VideoProcessing, b"{}".to_vec())
            .await
            .unwrap();
        broker
            .fetch(QueueName::VideoProcessing, "dead", 1, Duration::ZERO)
            .await
            .unwrap();

        let early = broker
            .reclaim(QueueName::VideoProcessing, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = broker
            .reclaim(QueueName::VideoProcessing, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].redelivered);
    }

    #[tokio::test]
    async fn test_reject_dead_letters_under_policy() {
        let broker = MemoryBroker::with_policy(FailurePolicy::DeadLetter);
        broker
            .publish(QueueName::VideoProcessing, b"bad".to_vec())
            .await
            .unwrap();
        let fetched = broker
            .fetch(QueueName::VideoProcessing, "c1", 1, Duration::ZERO)
            .await
            .unwrap();

        broker.reject(&fetched[0], "boom").await.unwrap();
        assert_eq!(broker.dead_letters(QueueName::VideoProcessing), vec![b"bad".to_vec()]);
        assert_eq!(broker.pending_count(QueueName::VideoProcessing), 0);
    }

    #[tokio::test]
    async fn test_injected_publish_failures() {
        let broker = MemoryBroker::new();
        broker.fail_publishes(1);
        assert!(broker
            .publish(QueueName::StatusUpdate, b"{}".to_vec())
            .await
            .is_err());
        assert!(broker
            .publish(QueueName::StatusUpdate, b"{}".to_vec())
            .await
            .is_ok());
        assert_eq!(broker.publish_attempts(), 2);
        assert_eq!(broker.published(QueueName::StatusUpdate).len(), 1);
    }
}
