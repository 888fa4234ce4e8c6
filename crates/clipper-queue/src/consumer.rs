//! Prefetch-bounded queue consumer.
//!
//! The consumer keeps at most `prefetch` messages in flight. Each delivery
//! runs on its own task holding a semaphore permit; the handler's result
//! decides between ack and reject.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::error::QueueResult;
use crate::queue::QueueName;

/// Handles one delivery. `Ok` acks the message, `Err` rejects it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub queue: QueueName,
    pub consumer_name: String,
    /// Max unacknowledged messages held by this consumer
    pub prefetch: usize,
    pub block_timeout: Duration,
    pub claim_min_idle: Duration,
    pub claim_interval: Duration,
    /// How long shutdown waits for in-flight handlers
    pub drain_timeout: Duration,
}

impl ConsumerOptions {
    pub fn new(queue: QueueName, consumer_name: impl Into<String>, prefetch: usize) -> Self {
        Self {
            queue,
            consumer_name: consumer_name.into(),
            prefetch: prefetch.max(1),
            block_timeout: Duration::from_secs(2),
            claim_min_idle: Duration::from_secs(900),
            claim_interval: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct QueueConsumer {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumerOptions,
    slots: Arc<Semaphore>,
}

impl QueueConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(options.prefetch));
        Self {
            broker,
            handler,
            options,
            slots,
        }
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Messages currently being handled.
    pub fn in_flight(&self) -> usize {
        self.options.prefetch - self.slots.available_permits()
    }

    /// Consume until `shutdown` flips to true (or its sender is dropped),
    /// then wait up to the drain timeout for in-flight handlers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let queue = self.options.queue;
        self.broker.declare(queue).await?;

        info!(
            queue = %queue,
            consumer = %self.options.consumer_name,
            prefetch = self.options.prefetch,
            "Starting consumer"
        );

        // Reclaim once at startup, then on the interval
        let mut next_reclaim = Instant::now();

        loop {
            if *shutdown.borrow() {
                info!(queue = %queue, "Shutdown signal received, stopping consumer");
                break;
            }

            if Instant::now() >= next_reclaim {
                next_reclaim = Instant::now() + self.options.claim_interval;
                self.reclaim_abandoned().await;
            }

            let available = self.slots.available_permits();
            if available == 0 {
                // All slots busy; wait for one to free up
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    permit = self.slots.acquire() => drop(permit),
                }
                continue;
            }

            match self
                .broker
                .fetch(
                    queue,
                    &self.options.consumer_name,
                    available,
                    self.options.block_timeout,
                )
                .await
            {
                Ok(deliveries) => {
                    if !deliveries.is_empty() {
                        debug!(queue = %queue, count = deliveries.len(), "Fetched messages");
                    }
                    for delivery in deliveries {
                        self.dispatch(delivery).await;
                    }
                }
                Err(e) => {
                    warn!(queue = %queue, "Failed to fetch messages: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            if shutdown.has_changed().is_err() {
                break;
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn reclaim_abandoned(&self) {
        let available = self.slots.available_permits();
        if available == 0 {
            return;
        }

        match self
            .broker
            .reclaim(
                self.options.queue,
                &self.options.consumer_name,
                self.options.claim_min_idle,
                available,
            )
            .await
        {
            Ok(deliveries) => {
                for delivery in deliveries {
                    self.dispatch(delivery).await;
                }
            }
            Err(e) => warn!(queue = %self.options.queue, "Failed to reclaim pending messages: {}", e),
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(queue = %self.options.queue, "Consumer slots closed");
                return;
            }
        };

        let broker = Arc::clone(&self.broker);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = settle(broker.as_ref(), handler.as_ref(), &delivery).await;
            metrics::counter!(
                "queue_messages_total",
                "queue" => delivery.queue.as_str(),
                "outcome" => outcome
            )
            .increment(1);
        });
    }

    async fn drain(&self) {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            info!(queue = %self.options.queue, in_flight, "Waiting for in-flight messages to complete...");
        }

        let all = self.options.prefetch as u32;
        match tokio::time::timeout(self.options.drain_timeout, self.slots.acquire_many(all)).await {
            Ok(_) => info!(queue = %self.options.queue, "Consumer stopped"),
            Err(_) => warn!(
                queue = %self.options.queue,
                in_flight = self.in_flight(),
                "Drain timed out; unfinished messages stay pending for reclaim"
            ),
        }
    }
}

/// Run the handler and ack or reject the delivery. Returns the outcome label.
async fn settle(
    broker: &dyn Broker,
    handler: &dyn MessageHandler,
    delivery: &Delivery,
) -> &'static str {
    match handler.handle(delivery).await {
        Ok(()) => match broker.ack(delivery).await {
            Ok(()) => "acked",
            Err(e) => {
                error!(queue = %delivery.queue, message_id = %delivery.id, "Failed to ack message: {}", e);
                "ack_failed"
            }
        },
        Err(e) => {
            let reason = format!("{:#}", e);
            error!(queue = %delivery.queue, message_id = %delivery.id, "Handler failed: {}", reason);
            match broker.reject(delivery, &reason).await {
                Ok(()) => "rejected",
                Err(e) => {
                    error!(queue = %delivery.queue, message_id = %delivery.id, "Failed to reject message: {}", e);
                    "reject_failed"
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Recorder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        handled: AtomicUsize,
        saw_redelivery: AtomicBool,
        delay: Duration,
    }

    impl Recorder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                saw_redelivery: AtomicBool::new(false),
                delay,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if delivery.redelivered {
                self.saw_redelivery.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);

            if delivery.body == b"fail" {
                anyhow::bail!("handler refused message");
            }
            Ok(())
        }
    }

    fn options(prefetch: usize) -> ConsumerOptions {
        ConsumerOptions {
            block_timeout: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(5),
            ..ConsumerOptions::new(QueueName::VideoProcessing, "test-consumer", prefetch)
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_acks_success_and_rejects_failure() {
        let broker = Arc::new(MemoryBroker::new());
        for body in [b"ok".to_vec(), b"fail".to_vec(), b"ok".to_vec()] {
            broker
                .publish(QueueName::VideoProcessing, body)
                .await
                .unwrap();
        }

        let handler = Recorder::new(Duration::ZERO);
        let consumer = Arc::new(QueueConsumer::new(broker.clone(), handler.clone(), options(4)));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        wait_for(|| {
            broker.acked(QueueName::VideoProcessing).len() == 2
                && broker.rejected(QueueName::VideoProcessing).len() == 1
        })
        .await;

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let rejected = broker.rejected(QueueName::VideoProcessing);
        assert!(rejected[0].1.contains("handler refused message"));
        assert_eq!(broker.pending_count(QueueName::VideoProcessing), 0);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_prefetch() {
        let broker = Arc::new(MemoryBroker::new());
        for _ in 0..6 {
            broker
                .publish(QueueName::VideoProcessing, b"ok".to_vec())
                .await
                .unwrap();
        }

        let handler = Recorder::new(Duration::from_millis(30));
        let consumer = Arc::new(QueueConsumer::new(broker.clone(), handler.clone(), options(2)));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        wait_for(|| broker.acked(QueueName::VideoProcessing).len() == 6).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 6);
        assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_handler() {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .publish(QueueName::VideoProcessing, b"ok".to_vec())
            .await
            .unwrap();

        let handler = Recorder::new(Duration::from_millis(200));
        let consumer = Arc::new(QueueConsumer::new(broker.clone(), handler.clone(), options(1)));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        wait_for(|| handler.in_flight.load(Ordering::SeqCst) == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        // The handler finished and was acked before run returned
        assert_eq!(broker.acked(QueueName::VideoProcessing).len(), 1);
    }

    #[tokio::test]
    async fn test_reclaims_abandoned_messages() {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .publish(QueueName::VideoProcessing, b"ok".to_vec())
            .await
            .unwrap();
        // Another consumer took the message and died
        broker
            .fetch(QueueName::VideoProcessing, "dead", 1, Duration::ZERO)
            .await
            .unwrap();

        let handler = Recorder::new(Duration::ZERO);
        let consumer = Arc::new(QueueConsumer::new(
            broker.clone(),
            handler.clone(),
            ConsumerOptions {
                claim_min_idle: Duration::ZERO,
                ..options(2)
            },
        ));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });

        wait_for(|| broker.acked(QueueName::VideoProcessing).len() == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert!(handler.saw_redelivery.load(Ordering::SeqCst));
    }
}
