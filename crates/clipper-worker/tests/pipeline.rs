//! Job pipeline scenarios over in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;

use clipper_firestore::{
    ClipRepository, MemoryClipRepository, MemoryCreditRepository, MemoryFileRepository,
};
use clipper_models::{
    FileId, FileStatus, StatusUpdateMessage, UploadedFile, VideoConfig, VideoProcessingMessage,
};
use clipper_processing::{ProcessingError, ProcessingResult, ProcessingService};
use clipper_queue::{
    Broker, ConsumerOptions, MemoryBroker, MessagePublisher, QueueName, StatusPublisher,
};
use clipper_storage::{upload_key, MemoryStore};
use clipper_worker::discovery::{clips_folder, job_identifier};
use clipper_worker::{
    JobDependencies, JobExecutor, JobOutcome, JobProcessor, WorkerConfig, WorkerError,
};

mock! {
    pub Processing {}

    #[async_trait]
    impl ProcessingService for Processing {
        async fn process(&self, storage_path: &str, config: &VideoConfig) -> ProcessingResult<()>;
    }
}

const USER: &str = "user-1";

struct Harness {
    files: Arc<MemoryFileRepository>,
    clips: Arc<MemoryClipRepository>,
    credits: Arc<MemoryCreditRepository>,
    store: Arc<MemoryStore>,
    broker: Arc<MemoryBroker>,
}

impl Harness {
    fn new(balance: u32) -> Self {
        let credits = Arc::new(MemoryCreditRepository::new());
        credits.set_balance(USER, balance);
        Self {
            files: Arc::new(MemoryFileRepository::new()),
            clips: Arc::new(MemoryClipRepository::new()),
            credits,
            store: Arc::new(MemoryStore::new()),
            broker: Arc::new(MemoryBroker::new()),
        }
    }

    /// Store an upload and its record in `status`, returning the job message.
    fn upload(&self, status: FileStatus) -> VideoProcessingMessage {
        let path = upload_key(USER, "holiday.mp4");
        self.store.put(path.clone(), vec![0u8; 16]);

        let mut file = UploadedFile::new(USER, "holiday.mp4", path.clone(), 16, "video/mp4");
        file.status = status;
        let file_id = file.id.clone();
        self.files.insert(file);

        VideoProcessingMessage {
            file_id,
            user_id: USER.to_string(),
            file_path: path,
            config: VideoConfig::default(),
        }
    }

    fn processor(&self, processing: MockProcessing) -> JobProcessor {
        let deps = JobDependencies {
            files: self.files.clone(),
            clips: self.clips.clone(),
            credits: self.credits.clone(),
            store: self.store.clone(),
            processing: Arc::new(processing),
            status: StatusPublisher::new(MessagePublisher::new(self.broker.clone())),
        };
        JobProcessor::new(deps, &WorkerConfig::default())
    }

    fn statuses(&self) -> Vec<StatusUpdateMessage> {
        self.broker.decode_published(QueueName::StatusUpdate)
    }

    fn status_sequence(&self) -> Vec<FileStatus> {
        self.statuses().into_iter().map(|m| m.status).collect()
    }

    fn balance(&self) -> u32 {
        self.credits.get_balance(USER).unwrap_or_default()
    }

    fn record(&self, id: &FileId) -> UploadedFile {
        self.files.snapshot(id).expect("record exists")
    }
}

/// Processing that writes `count` clips for the job into storage.
fn producing(store: Arc<MemoryStore>, count: usize) -> MockProcessing {
    let mut processing = MockProcessing::new();
    processing
        .expect_process()
        .times(1)
        .returning(move |path, _| {
            let folder = clips_folder(path);
            let id = job_identifier(path);
            for n in 0..count {
                store.put(format!("{}/{}_clip_{}.mp4", folder, id, n), vec![1u8]);
            }
            Ok(())
        });
    processing
}

fn failing() -> MockProcessing {
    let mut processing = MockProcessing::new();
    processing.expect_process().times(1).returning(|_, _| {
        Err(ProcessingError::Rejected {
            status: 500,
            body: "render crashed".to_string(),
        })
    });
    processing
}

fn never_called() -> MockProcessing {
    let mut processing = MockProcessing::new();
    processing.expect_process().never();
    processing
}

#[tokio::test(start_paused = true)]
async fn test_no_credit_stops_before_processing() {
    let h = Harness::new(0);
    let job = h.upload(FileStatus::Queued);

    let outcome = h.processor(never_called()).process(&job).await.unwrap();

    assert_eq!(outcome, JobOutcome::NoCredit);
    assert_eq!(h.status_sequence(), vec![FileStatus::NoCredit]);
    assert_eq!(h.balance(), 0);
    assert_eq!(h.record(&job.file_id).status, FileStatus::NoCredit);
}

#[tokio::test(start_paused = true)]
async fn test_processing_failure_refunds_and_cleans_up() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    let folder = clips_folder(&job.file_path);
    let partial = format!("{}/{}_clip_0.mp4", folder, job_identifier(&job.file_path));
    let unrelated = format!("{}/someone-else_clip_0.mp4", folder);
    h.store.put(partial.clone(), vec![1u8]);
    h.store.put(unrelated.clone(), vec![1u8]);

    let err = h.processor(failing()).process(&job).await.unwrap_err();

    assert!(matches!(err, WorkerError::Processing(_)));
    assert_eq!(
        h.status_sequence(),
        vec![FileStatus::Processing, FileStatus::Failed]
    );
    assert_eq!(h.balance(), 5);
    assert_eq!(h.record(&job.file_id).status, FileStatus::Failed);
    assert!(!h.store.contains(&job.file_path));
    assert!(!h.store.contains(&partial));
    assert!(h.store.contains(&unrelated));
}

#[tokio::test(start_paused = true)]
async fn test_success_saves_discovered_clips() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);

    let outcome = h
        .processor(producing(h.store.clone(), 3))
        .process(&job)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { clip_count: 3 });
    assert_eq!(
        h.status_sequence(),
        vec![FileStatus::Processing, FileStatus::Success]
    );
    assert_eq!(h.statuses().last().map(|m| m.clip_count), Some(3));
    assert_eq!(h.balance(), 4);
    assert_eq!(h.store.list_calls(), 1);

    let clips = h.clips.list_by_file(&job.file_id).await.unwrap();
    assert_eq!(clips.len(), 3);
    assert!(clips.iter().all(|c| c.source_name == "holiday.mp4" && c.user_id == USER));

    let record = h.record(&job.file_id);
    assert_eq!(record.status, FileStatus::Success);
    assert_eq!(record.clip_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_empty_listing_fails_and_refunds() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    let started = tokio::time::Instant::now();

    let err = h
        .processor(producing(h.store.clone(), 0))
        .process(&job)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::NoArtifacts(_)));
    assert_eq!(
        h.status_sequence(),
        vec![FileStatus::Processing, FileStatus::Failed]
    );
    assert_eq!(h.balance(), 5);
    assert!(h.clips.all().is_empty());
    assert_eq!(h.store.list_calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_ignores_other_jobs_in_shared_folder() {
    let h = Harness::new(5);
    let other = h.upload(FileStatus::Queued);
    let job = h.upload(FileStatus::Queued);
    let folder = clips_folder(&job.file_path);
    h.store.put(
        format!("{}/{}_clip_0.mp4", folder, job_identifier(&other.file_path)),
        vec![1u8],
    );

    let outcome = h
        .processor(producing(h.store.clone(), 2))
        .process(&job)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { clip_count: 2 });
    let clips = h.clips.list_by_file(&job.file_id).await.unwrap();
    let id = job_identifier(&job.file_path);
    assert!(clips.iter().all(|c| c.file_path.contains(id)));
}

#[tokio::test(start_paused = true)]
async fn test_only_saved_clips_are_counted() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    h.clips.fail_saves(1);

    let outcome = h
        .processor(producing(h.store.clone(), 3))
        .process(&job)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { clip_count: 2 });
    assert_eq!(h.clips.all().len(), 2);
    assert_eq!(h.statuses().last().map(|m| m.clip_count), Some(2));
    assert_eq!(h.record(&job.file_id).clip_count, 2);
    assert_eq!(h.balance(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_clip_saved_fails_and_refunds() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    h.clips.fail_saves(2);

    let err = h
        .processor(producing(h.store.clone(), 2))
        .process(&job)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::NoArtifacts(_)));
    assert!(h.clips.all().is_empty());
    assert_eq!(
        h.status_sequence(),
        vec![FileStatus::Processing, FileStatus::Failed]
    );
    assert_eq!(h.record(&job.file_id).status, FileStatus::Failed);
    assert_eq!(h.balance(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_debit_error_fails_without_charge() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    h.credits.fail_debits(1);

    let err = h.processor(never_called()).process(&job).await.unwrap_err();

    assert!(matches!(err, WorkerError::Firestore(_)));
    assert_eq!(h.status_sequence(), vec![FileStatus::Failed]);
    assert_eq!(h.record(&job.file_id).status, FileStatus::Failed);
    assert_eq!(h.balance(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_refund_exhaustion_still_reports_failure() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    h.credits.fail_credits(3);

    let err = h.processor(failing()).process(&job).await.unwrap_err();

    assert!(err.refund_failed());
    assert_eq!(
        h.status_sequence(),
        vec![FileStatus::Processing, FileStatus::Failed]
    );
    assert_eq!(h.balance(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_status_update_failures_do_not_abort_job() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Queued);
    h.files.fail_status_updates(1);
    h.broker.fail_publishes(1);

    let outcome = h
        .processor(producing(h.store.clone(), 1))
        .process(&job)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { clip_count: 1 });
    assert_eq!(h.status_sequence(), vec![FileStatus::Success]);
    assert_eq!(h.record(&job.file_id).status, FileStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_terminal_job_is_skipped() {
    let h = Harness::new(5);
    let job = h.upload(FileStatus::Success);

    let outcome = h.processor(never_called()).process(&job).await.unwrap();

    assert_eq!(outcome, JobOutcome::AlreadyFinished(FileStatus::Success));
    assert!(h.statuses().is_empty());
    assert_eq!(h.balance(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_processing_job_is_not_charged_twice() {
    let h = Harness::new(4);
    let job = h.upload(FileStatus::Processing);

    let outcome = h
        .processor(producing(h.store.clone(), 2))
        .process(&job)
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { clip_count: 2 });
    assert_eq!(h.balance(), 4);
    assert_eq!(h.status_sequence(), vec![FileStatus::Success]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_or_foreign_record_is_rejected() {
    let h = Harness::new(5);
    let mut job = h.upload(FileStatus::Queued);

    job.user_id = "intruder".to_string();
    let err = h.processor(never_called()).process(&job).await.unwrap_err();
    assert!(matches!(err, WorkerError::OwnerMismatch { .. }));

    job.file_id = FileId::from("missing");
    let err = h.processor(never_called()).process(&job).await.unwrap_err();
    assert!(matches!(err, WorkerError::FileNotFound(_)));

    assert_eq!(h.balance(), 5);
    assert!(h.statuses().is_empty());
}

#[tokio::test]
async fn test_executor_acks_success_and_rejects_failure() {
    let h = Harness::new(5);
    let good = h.upload(FileStatus::Queued);
    let publisher = MessagePublisher::new(h.broker.clone());
    publisher.publish_video_processing(&good).await.unwrap();
    h.broker
        .publish(QueueName::VideoProcessing, b"not a job".to_vec())
        .await
        .unwrap();

    let processor = Arc::new(h.processor(producing(h.store.clone(), 1)));
    let options = ConsumerOptions {
        block_timeout: Duration::from_millis(20),
        ..ConsumerOptions::new(QueueName::VideoProcessing, "worker-test", 4)
    };
    let executor = Arc::new(JobExecutor::new(h.broker.clone(), processor, options));

    let task = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run().await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.broker.acked(QueueName::VideoProcessing).len()
            + h.broker.rejected(QueueName::VideoProcessing).len()
            < 2
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages not settled in time");

    executor.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(h.broker.acked(QueueName::VideoProcessing).len(), 1);
    assert_eq!(h.broker.rejected(QueueName::VideoProcessing).len(), 1);
    assert_eq!(h.record(&good.file_id).status, FileStatus::Success);
}
