//! Status update relay.
//!
//! Consumes the `status_update` queue and hands each event to the live
//! notifier for the owning user.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use clipper_models::{LiveEvent, StatusUpdateMessage};
use clipper_queue::{Broker, ConsumerOptions, Delivery, MessageHandler, QueueConsumer, QueueResult};

use crate::fanout::LiveNotifier;

pub struct StatusRelay {
    notifier: Arc<LiveNotifier>,
}

impl StatusRelay {
    pub fn new(notifier: Arc<LiveNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl MessageHandler for StatusRelay {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let update: StatusUpdateMessage = delivery.decode()?;
        let user_id = update.user_id.clone();
        let file_id = update.file_id.clone();
        let status = update.status;

        let delivered = self
            .notifier
            .publish(&user_id, &LiveEvent::status_update(update));

        debug!(
            file_id = %file_id,
            user_id = %user_id,
            status = %status,
            delivered,
            "Relayed status update"
        );
        Ok(())
    }
}

/// Runs the status consumer until shutdown.
pub struct StatusRelayWorker {
    consumer: QueueConsumer,
}

impl StatusRelayWorker {
    pub fn new(broker: Arc<dyn Broker>, notifier: Arc<LiveNotifier>, options: ConsumerOptions) -> Self {
        let handler = Arc::new(StatusRelay::new(notifier));
        Self {
            consumer: QueueConsumer::new(broker, handler, options),
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(
            consumer = %self.consumer.options().consumer_name,
            prefetch = self.consumer.options().prefetch,
            "Starting status relay"
        );
        self.consumer.run(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clipper_models::{FileId, FileStatus};
    use clipper_queue::{MemoryBroker, MessagePublisher, QueueName};

    #[tokio::test]
    async fn test_relays_to_owner_connections() {
        let notifier = Arc::new(LiveNotifier::new(10));
        let mut subscription = notifier.subscribe("u1");
        let relay = StatusRelay::new(Arc::clone(&notifier));

        let body = serde_json::to_vec(&StatusUpdateMessage::new(
            FileId::from("f1"),
            "u1",
            FileStatus::Success,
            4,
        ))
        .unwrap();
        let delivery = Delivery {
            queue: QueueName::StatusUpdate,
            id: "1-0".to_string(),
            body,
            redelivered: false,
        };

        relay.handle(&delivery).await.unwrap();

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.name, "status_update");
        assert_eq!(event.payload.clip_count, 4);
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected() {
        let relay = StatusRelay::new(Arc::new(LiveNotifier::new(10)));
        let delivery = Delivery {
            queue: QueueName::StatusUpdate,
            id: "1-0".to_string(),
            body: b"not json".to_vec(),
            redelivered: false,
        };
        assert!(relay.handle(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_worker_consumes_queue() {
        let broker = Arc::new(MemoryBroker::new());
        let notifier = Arc::new(LiveNotifier::new(10));
        let mut subscription = notifier.subscribe("u1");

        let mut options = ConsumerOptions::new(QueueName::StatusUpdate, "api-test", 100);
        options.block_timeout = Duration::from_millis(50);
        let worker = StatusRelayWorker::new(broker.clone(), Arc::clone(&notifier), options);

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(shutdown).await });

        MessagePublisher::new(broker.clone())
            .publish_status_update(&StatusUpdateMessage::new(
                FileId::from("f1"),
                "u1",
                FileStatus::Processing,
                0,
            ))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload.status, FileStatus::Processing);

        stop.send_replace(true);
        handle.await.unwrap().unwrap();
        assert_eq!(broker.acked(QueueName::StatusUpdate).len(), 1);
    }
}
