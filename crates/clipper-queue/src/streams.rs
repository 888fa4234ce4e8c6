//! Broker backed by Redis Streams.
//!
//! Each queue is a stream; each service reads it through a consumer group.
//! `XREADGROUP` moves entries to the group's pending list, `XACK` + `XDEL`
//! removes them, and `XPENDING` + `XCLAIM` recover entries whose consumer
//! went away.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery};
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailurePolicy, QueueConfig, QueueName};

/// Field holding the message body on stream entries.
const BODY_FIELD: &str = "body";

/// Redis Streams broker.
pub struct RedisBroker {
    client: redis::Client,
    /// Shared, auto-reconnecting connection for non-blocking commands
    commands: ConnectionManager,
    /// One connection per queue for blocking reads, so a parked
    /// `XREADGROUP` never delays publishes or acks.
    readers: Mutex<HashMap<QueueName, MultiplexedConnection>>,
    config: QueueConfig,
}

impl RedisBroker {
    /// Connect to Redis.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!(group = %config.consumer_group, consumer = %config.consumer_name, "Connected to Redis");

        Ok(Self {
            client,
            commands,
            readers: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of entries in a queue's stream.
    pub async fn len(&self, queue: QueueName) -> QueueResult<u64> {
        let mut conn = self.commands.clone();
        let len: u64 = redis::cmd("XLEN")
            .arg(queue.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn reader(&self, queue: QueueName) -> QueueResult<MultiplexedConnection> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(&queue) {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        readers.insert(queue, conn.clone());
        Ok(conn)
    }

    async fn drop_reader(&self, queue: QueueName) {
        self.readers.lock().await.remove(&queue);
    }

    /// Turn stream entries into deliveries, acking entries with no body.
    async fn into_deliveries(
        &self,
        queue: QueueName,
        entries: Vec<StreamId>,
        redelivered: bool,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.get::<Vec<u8>>(BODY_FIELD) {
                Some(body) => deliveries.push(Delivery {
                    queue,
                    id: entry.id,
                    body,
                    redelivered,
                }),
                None => {
                    warn!(queue = %queue, message_id = %entry.id, "Dropping stream entry without body");
                    if let Err(e) = self.remove(queue, &entry.id).await {
                        warn!(queue = %queue, message_id = %entry.id, "Failed to drop entry: {}", e);
                    }
                }
            }
        }
        deliveries
    }

    async fn remove(&self, queue: QueueName, id: &str) -> QueueResult<()> {
        let mut conn = self.commands.clone();

        redis::cmd("XACK")
            .arg(queue.as_str())
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(queue.as_str())
            .arg(id)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.commands.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn declare(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.commands.clone();

        // Start at 0 so entries published before the group existed are
        // still delivered. An existing group keeps its position.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue.as_str())
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(queue = %queue, "Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue = %queue, "Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn publish(&self, queue: QueueName, body: Vec<u8>) -> QueueResult<String> {
        let mut conn = self.commands.clone();
        let timeout = self.config.publish_timeout;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(queue.as_str()).arg("*").arg(BODY_FIELD).arg(body);
        let add = cmd.query_async::<String>(&mut conn);

        let message_id = tokio::time::timeout(timeout, add)
            .await
            .map_err(|_| QueueError::PublishTimeout {
                queue: queue.to_string(),
                millis: timeout.as_millis() as u64,
            })?
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;

        debug!(queue = %queue, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn fetch(
        &self,
        queue: QueueName,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.reader(queue).await?;

        let result: Result<Option<StreamReadReply>, redis::RedisError> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(queue.as_str())
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                // Force a fresh connection on the next fetch
                self.drop_reader(queue).await;
                return Err(QueueError::FetchFailed(e.to_string()));
            }
        };

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.into_deliveries(queue, entries, false).await)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.remove(delivery.queue, &delivery.id).await?;
        debug!(queue = %delivery.queue, message_id = %delivery.id, "Acknowledged message");
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        if self.config.failure_policy == FailurePolicy::DeadLetter {
            let mut conn = self.commands.clone();
            redis::cmd("XADD")
                .arg(delivery.queue.dead_letter_stream())
                .arg("*")
                .arg(BODY_FIELD)
                .arg(delivery.body.as_slice())
                .arg("error")
                .arg(reason)
                .arg("original_id")
                .arg(&delivery.id)
                .query_async::<()>(&mut conn)
                .await?;
            warn!(queue = %delivery.queue, message_id = %delivery.id, "Dead-lettered message: {}", reason);
        } else {
            warn!(queue = %delivery.queue, message_id = %delivery.id, "Dropped message: {}", reason);
        }

        self.remove(delivery.queue, &delivery.id).await
    }

    async fn reclaim(
        &self,
        queue: QueueName,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.commands.clone();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(queue.as_str())
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(queue.as_str())
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            claim.arg(&entry.id);
        }

        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;
        if !claimed.ids.is_empty() {
            info!(queue = %queue, count = claimed.ids.len(), "Claimed abandoned messages");
        }

        Ok(self.into_deliveries(queue, claimed.ids, true).await)
    }
}
