//! Job executor.
//!
//! Binds the job processor to the `video_processing` queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use clipper_models::VideoProcessingMessage;
use clipper_queue::{Broker, ConsumerOptions, Delivery, MessageHandler, QueueConsumer};

use crate::error::WorkerResult;
use crate::processor::{JobOutcome, JobProcessor};

/// Decodes job messages and runs them through the processor.
pub struct VideoJobHandler {
    processor: Arc<JobProcessor>,
}

impl VideoJobHandler {
    pub fn new(processor: Arc<JobProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler for VideoJobHandler {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let job: VideoProcessingMessage = delivery.decode()?;

        if delivery.redelivered {
            warn!(
                file_id = %job.file_id,
                message_id = %delivery.id,
                "Job redelivered after consumer loss"
            );
        }

        match self.processor.process(&job).await? {
            JobOutcome::AlreadyFinished(status) => {
                info!(file_id = %job.file_id, status = %status, "Skipped finished job")
            }
            JobOutcome::NoCredit => info!(file_id = %job.file_id, "Job stopped: no credit"),
            JobOutcome::Completed { clip_count } => {
                info!(file_id = %job.file_id, clip_count, "Job {} completed successfully", job.file_id)
            }
        }
        Ok(())
    }
}

/// Consumes job messages until shutdown.
pub struct JobExecutor {
    consumer: QueueConsumer,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(broker: Arc<dyn Broker>, processor: Arc<JobProcessor>, options: ConsumerOptions) -> Self {
        let handler = Arc::new(VideoJobHandler::new(processor));
        let (shutdown, _) = watch::channel(false);
        Self {
            consumer: QueueConsumer::new(broker, handler, options),
            shutdown,
        }
    }

    /// Ask a running executor to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Consume until `shutdown` is called, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer.options().consumer_name,
            prefetch = self.consumer.options().prefetch,
            "Starting job executor"
        );
        self.consumer.run(self.shutdown.subscribe()).await?;
        info!("Job executor stopped");
        Ok(())
    }
}
