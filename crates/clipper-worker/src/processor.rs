//! Per-job state machine.
//!
//! `uploaded/queued -> processing -> success | failed`, or straight to
//! `no_credit` when the owner cannot pay. One credit is debited before the
//! processing call; every failure after that point refunds it.

use std::sync::Arc;

use tracing::Instrument;

use clipper_firestore::{ClipRepository, CreditRepository, DebitOutcome, FileRepository};
use clipper_models::{Clip, FileId, FileStatus, UploadedFile, VideoProcessingMessage};
use clipper_processing::ProcessingService;
use clipper_queue::StatusPublisher;
use clipper_storage::ArtifactStore;

use crate::config::WorkerConfig;
use crate::credits::CreditLedger;
use crate::discovery::{belonging_to, clips_folder, job_identifier, ArtifactDiscovery};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryConfig;

/// How a job ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The record was already terminal; nothing was done.
    AlreadyFinished(FileStatus),
    /// The owner had no credit; nothing was charged or processed.
    NoCredit,
    /// Clips were produced and saved.
    Completed { clip_count: u32 },
}

/// Collaborators a processor works against.
pub struct JobDependencies {
    pub files: Arc<dyn FileRepository>,
    pub clips: Arc<dyn ClipRepository>,
    pub credits: Arc<dyn CreditRepository>,
    pub store: Arc<dyn ArtifactStore>,
    pub processing: Arc<dyn ProcessingService>,
    pub status: StatusPublisher,
}

pub struct JobProcessor {
    files: Arc<dyn FileRepository>,
    clips: Arc<dyn ClipRepository>,
    store: Arc<dyn ArtifactStore>,
    processing: Arc<dyn ProcessingService>,
    status: StatusPublisher,
    ledger: CreditLedger,
    discovery: ArtifactDiscovery,
}

impl JobProcessor {
    pub fn new(deps: JobDependencies, config: &WorkerConfig) -> Self {
        let ledger = CreditLedger::new(
            deps.credits,
            RetryConfig::new("credit_refund")
                .with_max_attempts(config.refund_attempts)
                .with_delay(config.refund_backoff),
        );
        let discovery = ArtifactDiscovery::new(
            Arc::clone(&deps.store),
            config.listing_attempts,
            config.listing_delay,
        );

        Self {
            files: deps.files,
            clips: deps.clips,
            store: deps.store,
            processing: deps.processing,
            status: deps.status,
            ledger,
            discovery,
        }
    }

    /// Run one job to a terminal status.
    ///
    /// `Err` means the message should not be acked as done: the record was
    /// unusable, or the job failed (its credit refunded where one was taken).
    pub async fn process(&self, job: &VideoProcessingMessage) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(&job.file_id, &job.user_id);
        let span = logger.create_span();
        self.run(job, &logger).instrument(span).await
    }

    async fn run(&self, job: &VideoProcessingMessage, logger: &JobLogger) -> WorkerResult<JobOutcome> {
        let file = self
            .files
            .get(&job.file_id)
            .await?
            .ok_or_else(|| WorkerError::FileNotFound(job.file_id.clone()))?;

        if !file.is_owned_by(&job.user_id) {
            return Err(WorkerError::OwnerMismatch {
                file_id: job.file_id.clone(),
                user_id: job.user_id.clone(),
            });
        }

        if file.status.is_terminal() {
            logger.log_warning(&format!("already {}, skipping", file.status));
            return Ok(JobOutcome::AlreadyFinished(file.status));
        }

        if file.status == FileStatus::Processing {
            // A previous delivery debited and then died mid-job
            logger.log_progress("resuming redelivered job, credit already taken");
        } else {
            logger.log_start(&file.file_name);

            match self.ledger.debit(&job.user_id).await {
                Ok(DebitOutcome::Debited { remaining }) => {
                    logger.log_progress(&format!("debited 1 credit, {} remaining", remaining));
                }
                Ok(DebitOutcome::Insufficient { balance }) => {
                    logger.log_warning(&format!("insufficient credits (balance {})", balance));
                    self.finish(job, logger, FileStatus::NoCredit, 0).await;
                    return Ok(JobOutcome::NoCredit);
                }
                Err(e) => {
                    // Nothing was taken, so nothing to refund
                    logger.log_error(&format!("credit debit failed: {}", e));
                    self.finish(job, logger, FileStatus::Failed, 0).await;
                    return Err(e.into());
                }
            }

            self.set_status(&job.file_id, FileStatus::Processing, None, logger)
                .await;
            self.status
                .publish(&job.file_id, &job.user_id, FileStatus::Processing, 0)
                .await;
        }

        if let Err(e) = self.processing.process(&job.file_path, &job.config).await {
            logger.log_error(&format!("processing service failed: {}", e));
            let err = self.fail(job, logger, e.into()).await;
            self.remove_outputs(&job.file_path, logger).await;
            return Err(err);
        }
        logger.log_progress("processing service finished");

        let paths = match self.discovery.discover(&job.file_path).await {
            Ok(paths) => paths,
            Err(e) => {
                logger.log_error(&format!("listing clips failed: {}", e));
                return Err(self.fail(job, logger, e.into()).await);
            }
        };

        let saved = self.save_clips(&file, &paths, logger).await;
        if saved == 0 {
            logger.log_error("no clips produced");
            return Err(self
                .fail(job, logger, WorkerError::NoArtifacts(job.file_id.clone()))
                .await);
        }

        self.set_status(&job.file_id, FileStatus::Success, Some(saved), logger)
            .await;
        self.status
            .publish(&job.file_id, &job.user_id, FileStatus::Success, saved)
            .await;
        metrics::record_job(FileStatus::Success);
        metrics::record_clips_saved(saved);
        logger.log_completion(&format!("{} clips", saved));

        Ok(JobOutcome::Completed { clip_count: saved })
    }

    /// Refund, mark failed and notify. Returns `cause` with any refund failure attached.
    async fn fail(
        &self,
        job: &VideoProcessingMessage,
        logger: &JobLogger,
        cause: WorkerError,
    ) -> WorkerError {
        let refund = self.ledger.refund(&job.user_id, &job.file_id).await;
        self.finish(job, logger, FileStatus::Failed, 0).await;
        cause.with_refund_result(refund)
    }

    /// Persist and publish a terminal status.
    async fn finish(
        &self,
        job: &VideoProcessingMessage,
        logger: &JobLogger,
        status: FileStatus,
        clip_count: u32,
    ) {
        self.set_status(&job.file_id, status, None, logger).await;
        self.status
            .publish(&job.file_id, &job.user_id, status, clip_count)
            .await;
        metrics::record_job(status);
    }

    async fn set_status(
        &self,
        file_id: &FileId,
        status: FileStatus,
        clip_count: Option<u32>,
        logger: &JobLogger,
    ) {
        match self.files.update_status(file_id, status, clip_count).await {
            Ok(true) => {}
            Ok(false) => logger.log_warning(&format!("status {} would move backwards, not written", status)),
            Err(e) => logger.log_warning(&format!("failed to set status {}: {}", status, e)),
        }
    }

    /// Save one clip per path. Returns how many were saved.
    async fn save_clips(&self, file: &UploadedFile, paths: &[String], logger: &JobLogger) -> u32 {
        let mut saved = 0;
        for path in paths {
            let clip = Clip::new(file.user_id.clone(), file.id.clone(), file.file_name.clone(), path.clone());
            match self.clips.save(&clip).await {
                Ok(()) => saved += 1,
                Err(e) => logger.log_warning(&format!("failed to save clip {}: {}", path, e)),
            }
        }
        saved
    }

    /// Best-effort removal of the input and any partial clips after a failed call.
    async fn remove_outputs(&self, input_path: &str, logger: &JobLogger) {
        if let Err(e) = self.store.delete(input_path).await {
            logger.log_warning(&format!("failed to delete original {}: {}", input_path, e));
        }

        let folder = clips_folder(input_path);
        let partial = match self.store.list_files(&folder).await {
            Ok(listing) => belonging_to(listing, job_identifier(input_path)),
            Err(e) => {
                logger.log_warning(&format!("failed to list {} for cleanup: {}", folder, e));
                return;
            }
        };

        for path in partial {
            if let Err(e) = self.store.delete(&path).await {
                logger.log_warning(&format!("failed to delete partial clip {}: {}", path, e));
            }
        }
    }
}
