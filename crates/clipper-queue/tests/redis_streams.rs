//! Redis Streams broker tests against a live Redis.

use std::time::Duration;

use clipper_queue::{Broker, FailurePolicy, QueueConfig, QueueName, RedisBroker};

/// Fresh groups start at the head of shared streams, so read past any leftovers.
const BACKLOG: usize = 1000;

async fn broker(group: &str, policy: FailurePolicy) -> RedisBroker {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        consumer_group: group.to_string(),
        failure_policy: policy,
        ..QueueConfig::from_env().expect("Failed to read queue config")
    };
    RedisBroker::connect(config)
        .await
        .expect("Failed to connect to Redis")
}

/// Publish, fetch and ack one message.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_fetch_ack() {
    let group = format!("test-{}", uuid::Uuid::new_v4().simple());
    let broker = broker(&group, FailurePolicy::Drop).await;
    broker.ping().await.expect("Failed to ping");
    broker
        .declare(QueueName::EmailNotification)
        .await
        .expect("Failed to declare");

    let id = broker
        .publish(QueueName::EmailNotification, br#"{"hello":"world"}"#.to_vec())
        .await
        .expect("Failed to publish");

    let deliveries = broker
        .fetch(QueueName::EmailNotification, "c1", BACKLOG, Duration::from_secs(1))
        .await
        .expect("Failed to fetch");
    let delivery = deliveries
        .iter()
        .find(|d| d.id == id)
        .expect("Published message not fetched");
    assert!(!delivery.redelivered);

    broker.ack(delivery).await.expect("Failed to ack");
}

/// A message left pending by a dead consumer is claimable.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reclaim_pending() {
    let group = format!("test-{}", uuid::Uuid::new_v4().simple());
    let broker = broker(&group, FailurePolicy::Drop).await;
    broker
        .declare(QueueName::StatusUpdate)
        .await
        .expect("Failed to declare");

    let id = broker
        .publish(QueueName::StatusUpdate, b"{}".to_vec())
        .await
        .expect("Failed to publish");
    broker
        .fetch(QueueName::StatusUpdate, "dead", BACKLOG, Duration::from_secs(1))
        .await
        .expect("Failed to fetch");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = broker
        .reclaim(QueueName::StatusUpdate, "alive", Duration::from_millis(10), BACKLOG)
        .await
        .expect("Failed to reclaim");
    let delivery = claimed
        .iter()
        .find(|d| d.id == id)
        .expect("Pending message not claimed");
    assert!(delivery.redelivered);

    broker.ack(delivery).await.expect("Failed to ack");
}

/// Rejected messages land on the dead-letter stream.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reject_dead_letters() {
    let group = format!("test-{}", uuid::Uuid::new_v4().simple());
    let broker = broker(&group, FailurePolicy::DeadLetter).await;
    broker
        .declare(QueueName::VideoProcessing)
        .await
        .expect("Failed to declare");

    broker
        .publish(QueueName::VideoProcessing, b"not json".to_vec())
        .await
        .expect("Failed to publish");
    let deliveries = broker
        .fetch(QueueName::VideoProcessing, "c1", BACKLOG, Duration::from_secs(1))
        .await
        .expect("Failed to fetch");
    let delivery = deliveries.first().expect("Nothing fetched");

    broker
        .reject(delivery, "malformed")
        .await
        .expect("Failed to reject");
}

/// A job published before its consumer group exists is still delivered.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_group_sees_messages_published_before_it() {
    let publisher = broker("test-publisher", FailurePolicy::Drop).await;
    let id = publisher
        .publish(QueueName::VideoProcessing, br#"{"early":true}"#.to_vec())
        .await
        .expect("Failed to publish");

    let group = format!("test-{}", uuid::Uuid::new_v4().simple());
    let worker = broker(&group, FailurePolicy::Drop).await;
    worker
        .declare(QueueName::VideoProcessing)
        .await
        .expect("Failed to declare");

    let deliveries = worker
        .fetch(QueueName::VideoProcessing, "c1", BACKLOG, Duration::from_secs(1))
        .await
        .expect("Failed to fetch");
    let delivery = deliveries
        .iter()
        .find(|d| d.id == id)
        .expect("Early message not delivered");

    worker.ack(delivery).await.expect("Failed to ack");
}
