//! Queue names and configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::consumer::ConsumerOptions;
use crate::error::QueueError;

/// The queues shared by the API and the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    VideoProcessing,
    StatusUpdate,
    EmailNotification,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::VideoProcessing,
        QueueName::StatusUpdate,
        QueueName::EmailNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::VideoProcessing => "video_processing",
            QueueName::StatusUpdate => "status_update",
            QueueName::EmailNotification => "email_notification",
        }
    }

    /// Stream holding rejected messages when dead-lettering is enabled.
    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dlq", self.as_str())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Remove the message; it is not retried.
    #[default]
    Drop,
    /// Copy the message and failure reason to `<queue>:dlq`, then remove it.
    DeadLetter,
}

impl FromStr for FailurePolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "dead_letter" | "dlq" => Ok(FailurePolicy::DeadLetter),
            other => Err(QueueError::invalid_config(format!(
                "unknown failure policy {:?}, expected drop or dead_letter",
                other
            ))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Consumer group for this service
    pub consumer_group: String,
    /// Consumer name within the group; unique per process
    pub consumer_name: String,
    pub failure_policy: FailurePolicy,
    /// Upper bound on a single publish
    pub publish_timeout: Duration,
    /// Max unacknowledged job messages per consumer
    pub video_prefetch: usize,
    pub email_prefetch: usize,
    pub status_prefetch: usize,
    /// How long a fetch waits for new messages
    pub block_timeout: Duration,
    /// Pending messages idle this long are taken over from dead consumers.
    /// Must exceed the longest handler run.
    pub claim_min_idle: Duration,
    /// How often to look for abandoned messages
    pub claim_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: "clipper:workers".to_string(),
            consumer_name: default_consumer_name(),
            failure_policy: FailurePolicy::Drop,
            publish_timeout: Duration::from_secs(5),
            video_prefetch: 30,
            email_prefetch: 3,
            status_prefetch: 100,
            block_timeout: Duration::from_secs(2),
            claim_min_idle: Duration::from_secs(900),
            claim_interval: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, QueueError> {
        let defaults = Self::default();

        let failure_policy = match std::env::var("QUEUE_FAILURE_POLICY") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.failure_policy,
        };

        Ok(Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME")
                .unwrap_or(defaults.consumer_name),
            failure_policy,
            publish_timeout: Duration::from_millis(
                env_parse("QUEUE_PUBLISH_TIMEOUT_MS").unwrap_or(5000),
            ),
            video_prefetch: env_parse("VIDEO_QUEUE_PREFETCH").unwrap_or(defaults.video_prefetch),
            email_prefetch: env_parse("EMAIL_QUEUE_PREFETCH").unwrap_or(defaults.email_prefetch),
            status_prefetch: env_parse("STATUS_QUEUE_PREFETCH")
                .unwrap_or(defaults.status_prefetch),
            block_timeout: Duration::from_millis(env_parse("QUEUE_BLOCK_MS").unwrap_or(2000)),
            claim_min_idle: Duration::from_secs(
                env_parse("QUEUE_CLAIM_MIN_IDLE_SECS").unwrap_or(900),
            ),
            claim_interval: Duration::from_secs(
                env_parse("QUEUE_CLAIM_INTERVAL_SECS").unwrap_or(60),
            ),
        })
    }

    /// Prefetch limit for a queue.
    pub fn prefetch(&self, queue: QueueName) -> usize {
        match queue {
            QueueName::VideoProcessing => self.video_prefetch,
            QueueName::StatusUpdate => self.status_prefetch,
            QueueName::EmailNotification => self.email_prefetch,
        }
        .max(1)
    }

    /// Consumer options for `queue` derived from this config.
    pub fn consumer_options(&self, queue: QueueName) -> ConsumerOptions {
        ConsumerOptions {
            queue,
            consumer_name: self.consumer_name.clone(),
            prefetch: self.prefetch(queue),
            block_timeout: self.block_timeout,
            claim_min_idle: self.claim_min_idle,
            claim_interval: self.claim_interval,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "clipper".to_string());
    format!("{}-{}", host, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_queue_names() {
        assert_eq!(QueueName::VideoProcessing.as_str(), "video_processing");
        assert_eq!(QueueName::StatusUpdate.dead_letter_stream(), "status_update:dlq");
    }

    #[test]
    fn test_prefetch_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.prefetch(QueueName::VideoProcessing), 30);
        assert_eq!(config.prefetch(QueueName::EmailNotification), 3);
        assert_eq!(config.prefetch(QueueName::StatusUpdate), 100);
        assert!(config.claim_min_idle > Duration::from_secs(600));
    }

    #[test]
    #[serial]
    fn test_failure_policy_from_env() {
        std::env::set_var("QUEUE_FAILURE_POLICY", "dead_letter");
        std::env::set_var("VIDEO_QUEUE_PREFETCH", "4");
        let config = QueueConfig::from_env().unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::DeadLetter);
        assert_eq!(config.prefetch(QueueName::VideoProcessing), 4);

        std::env::set_var("QUEUE_FAILURE_POLICY", "requeue");
        assert!(QueueConfig::from_env().is_err());

        std::env::remove_var("QUEUE_FAILURE_POLICY");
        std::env::remove_var("VIDEO_QUEUE_PREFETCH");
    }
}
