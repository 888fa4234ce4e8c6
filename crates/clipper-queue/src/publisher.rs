//! Typed publishers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use clipper_models::{
    EmailNotificationMessage, FileId, FileStatus, StatusUpdateMessage, VideoProcessingMessage,
};

use crate::broker::Broker;
use crate::error::QueueResult;
use crate::queue::QueueName;

/// Serializes messages and publishes them through a broker.
#[derive(Clone)]
pub struct MessagePublisher {
    broker: Arc<dyn Broker>,
}

impl MessagePublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Publish any serializable message as JSON.
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        queue: QueueName,
        message: &T,
    ) -> QueueResult<String> {
        let body = serde_json::to_vec(message)?;
        self.broker.publish(queue, body).await
    }

    pub async fn publish_video_processing(
        &self,
        message: &VideoProcessingMessage,
    ) -> QueueResult<String> {
        self.publish_json(QueueName::VideoProcessing, message).await
    }

    pub async fn publish_status_update(&self, message: &StatusUpdateMessage) -> QueueResult<String> {
        self.publish_json(QueueName::StatusUpdate, message).await
    }

    pub async fn publish_email_notification(
        &self,
        message: &EmailNotificationMessage,
    ) -> QueueResult<String> {
        self.publish_json(QueueName::EmailNotification, message).await
    }
}

/// Fire-and-forget status notifications.
///
/// A lost status event is only a missed UI update; the stored record stays
/// authoritative, so failures are logged and swallowed.
#[derive(Clone)]
pub struct StatusPublisher {
    publisher: MessagePublisher,
}

impl StatusPublisher {
    pub fn new(publisher: MessagePublisher) -> Self {
        Self { publisher }
    }

    pub async fn publish(
        &self,
        file_id: &FileId,
        user_id: &str,
        status: FileStatus,
        clip_count: u32,
    ) {
        let message = StatusUpdateMessage::new(file_id.clone(), user_id, status, clip_count);
        match self.publisher.publish_status_update(&message).await {
            Ok(id) => debug!(file_id = %file_id, status = %status, message_id = %id, "Published status update"),
            Err(e) => warn!(file_id = %file_id, status = %status, "Failed to publish status update: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    #[tokio::test]
    async fn test_status_publish_failure_is_swallowed() {
        let broker = Arc::new(MemoryBroker::new());
        let status = StatusPublisher::new(MessagePublisher::new(broker.clone()));

        broker.fail_publishes(1);
        status
            .publish(&FileId::from("f1"), "u1", FileStatus::Processing, 0)
            .await;
        status
            .publish(&FileId::from("f1"), "u1", FileStatus::Success, 2)
            .await;

        let sent: Vec<StatusUpdateMessage> = broker.decode_published(QueueName::StatusUpdate);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, FileStatus::Success);
        assert_eq!(sent[0].clip_count, 2);
    }

    #[tokio::test]
    async fn test_video_message_lands_on_job_queue() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = MessagePublisher::new(broker.clone());
        let message = VideoProcessingMessage {
            file_id: FileId::from("f1"),
            user_id: "u1".to_string(),
            file_path: "user-u1/x-video.mp4".to_string(),
            config: Default::default(),
        };

        publisher.publish_video_processing(&message).await.unwrap();
        assert_eq!(broker.published(QueueName::VideoProcessing).len(), 1);
        assert!(broker.published(QueueName::StatusUpdate).is_empty());
    }
}
