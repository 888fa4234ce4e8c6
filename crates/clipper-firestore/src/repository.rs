//! Repository contracts consumed by the API and the worker.

use async_trait::async_trait;
use clipper_models::{Clip, FileId, FileStatus, UploadedFile};

use crate::error::FirestoreResult;

/// Outcome of an atomic credit debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Credits were taken; `remaining` is the balance afterwards.
    Debited { remaining: u32 },
    /// Balance was below the requested amount; nothing changed.
    Insufficient { balance: u32 },
}

/// Persistence for uploaded file records.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create(&self, file: &UploadedFile) -> FirestoreResult<()>;

    async fn get(&self, id: &FileId) -> FirestoreResult<Option<UploadedFile>>;

    /// Advance status, and set clip count when given.
    ///
    /// Only forward transitions are written. Returns `false` when the stored
    /// status is already at or past `status` and nothing was changed.
    async fn update_status(
        &self,
        id: &FileId,
        status: FileStatus,
        clip_count: Option<u32>,
    ) -> FirestoreResult<bool>;

    /// Delete a record. Deleting a missing record succeeds.
    async fn delete(&self, id: &FileId) -> FirestoreResult<()>;

    /// Records owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<UploadedFile>>;
}

/// Persistence for clips.
#[async_trait]
pub trait ClipRepository: Send + Sync {
    /// Upsert by clip ID; saving the same clip twice leaves one record.
    async fn save(&self, clip: &Clip) -> FirestoreResult<()>;

    async fn get(&self, id: &str) -> FirestoreResult<Option<Clip>>;

    /// Non-deleted clips owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<Clip>>;

    async fn list_by_file(&self, file_id: &FileId) -> FirestoreResult<Vec<Clip>>;
}

/// Per-user credit balance with atomic adjustments.
#[async_trait]
pub trait CreditRepository: Send + Sync {
    async fn balance(&self, user_id: &str) -> FirestoreResult<u32>;

    /// Take `amount` credits if the balance allows it.
    async fn try_debit(&self, user_id: &str, amount: u32) -> FirestoreResult<DebitOutcome>;

    /// Add `amount` credits against the current stored balance.
    ///
    /// Returns the balance afterwards.
    async fn credit(&self, user_id: &str, amount: u32) -> FirestoreResult<u32>;
}
