//! In-memory repositories.
//!
//! Used by tests and local runs. Each store can be told to fail a number of
//! upcoming calls so recovery paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use clipper_models::{Clip, FileId, FileStatus, UploadedFile};

use crate::error::{FirestoreError, FirestoreResult};
use crate::repository::{ClipRepository, CreditRepository, DebitOutcome, FileRepository};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one pending injected failure, if any.
fn injected_failure(counter: &AtomicU32, what: &str) -> FirestoreResult<()> {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(FirestoreError::request_failed(format!("injected {} failure", what))),
        Err(_) => Ok(()),
    }
}

// =============================================================================
// Files
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryFileRepository {
    files: Mutex<HashMap<FileId, UploadedFile>>,
    status_failures: AtomicU32,
    create_failures: AtomicU32,
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly.
    pub fn insert(&self, file: UploadedFile) {
        lock(&self.files).insert(file.id.clone(), file);
    }

    pub fn snapshot(&self, id: &FileId) -> Option<UploadedFile> {
        lock(&self.files).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_status_updates(&self, n: u32) {
        self.status_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, n: u32) {
        self.create_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileRepository for MemoryFileRepository {
    async fn create(&self, file: &UploadedFile) -> FirestoreResult<()> {
        injected_failure(&self.create_failures, "create")?;
        let mut files = lock(&self.files);
        if files.contains_key(&file.id) {
            return Err(FirestoreError::AlreadyExists(file.id.to_string()));
        }
        files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn get(&self, id: &FileId) -> FirestoreResult<Option<UploadedFile>> {
        Ok(self.snapshot(id))
    }

    async fn update_status(
        &self,
        id: &FileId,
        status: FileStatus,
        clip_count: Option<u32>,
    ) -> FirestoreResult<bool> {
        injected_failure(&self.status_failures, "status update")?;
        let mut files = lock(&self.files);
        let file = files
            .get_mut(id)
            .ok_or_else(|| FirestoreError::not_found(id.to_string()))?;
        if !file.status.can_advance_to(status) {
            return Ok(false);
        }
        file.status = status;
        if let Some(count) = clip_count {
            file.clip_count = count;
        }
        file.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: &FileId) -> FirestoreResult<()> {
        lock(&self.files).remove(id);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<UploadedFile>> {
        let mut files: Vec<UploadedFile> = lock(&self.files)
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }
}

// =============================================================================
// Clips
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryClipRepository {
    clips: Mutex<HashMap<String, Clip>>,
    save_failures: AtomicU32,
}

impl MemoryClipRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Clip> {
        lock(&self.clips).values().cloned().collect()
    }

    pub fn fail_saves(&self, n: u32) {
        self.save_failures.store(n, Ordering::SeqCst);
    }

    fn filtered(&self, pred: impl Fn(&Clip) -> bool) -> Vec<Clip> {
        let mut clips: Vec<Clip> = lock(&self.clips)
            .values()
            .filter(|c| !c.is_deleted() && pred(c))
            .cloned()
            .collect();
        clips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        clips
    }
}

#[async_trait]
impl ClipRepository for MemoryClipRepository {
    async fn save(&self, clip: &Clip) -> FirestoreResult<()> {
        injected_failure(&self.save_failures, "clip save")?;
        lock(&self.clips).insert(clip.id.clone(), clip.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> FirestoreResult<Option<Clip>> {
        Ok(lock(&self.clips).get(id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> FirestoreResult<Vec<Clip>> {
        Ok(self.filtered(|c| c.user_id == user_id))
    }

    async fn list_by_file(&self, file_id: &FileId) -> FirestoreResult<Vec<Clip>> {
        Ok(self.filtered(|c| &c.uploaded_file_id == file_id))
    }
}

// =============================================================================
// Credits
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCreditRepository {
    balances: Mutex<HashMap<String, u32>>,
    credit_failures: AtomicU32,
    debit_failures: AtomicU32,
}

impl MemoryCreditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, user_id: impl Into<String>, credits: u32) {
        lock(&self.balances).insert(user_id.into(), credits);
    }

    pub fn get_balance(&self, user_id: &str) -> Option<u32> {
        lock(&self.balances).get(user_id).copied()
    }

    /// Fail the next `n` credit (refund) calls.
    pub fn fail_credits(&self, n: u32) {
        self.credit_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_debits(&self, n: u32) {
        self.debit_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreditRepository for MemoryCreditRepository {
    async fn balance(&self, user_id: &str) -> FirestoreResult<u32> {
        self.get_balance(user_id)
            .ok_or_else(|| FirestoreError::not_found(format!("user {}", user_id)))
    }

    async fn try_debit(&self, user_id: &str, amount: u32) -> FirestoreResult<DebitOutcome> {
        injected_failure(&self.debit_failures, "debit")?;
        let mut balances = lock(&self.balances);
        let balance = balances
            .get_mut(user_id)
            .ok_or_else(|| FirestoreError::not_found(format!("user {}", user_id)))?;
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient { balance: *balance });
        }
        *balance -= amount;
        Ok(DebitOutcome::Debited {
            remaining: *balance,
        })
    }

    async fn credit(&self, user_id: &str, amount: u32) -> FirestoreResult<u32> {
        injected_failure(&self.credit_failures, "credit")?;
        let mut balances = lock(&self.balances);
        let balance = balances
            .get_mut(user_id)
            .ok_or_else(|| FirestoreError::not_found(format!("user {}", user_id)))?;
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debit_and_credit() {
        let repo = MemoryCreditRepository::new();
        repo.set_balance("u1", 1);

        assert_eq!(
            repo.try_debit("u1", 1).await.unwrap(),
            DebitOutcome::Debited { remaining: 0 }
        );
        assert_eq!(
            repo.try_debit("u1", 1).await.unwrap(),
            DebitOutcome::Insufficient { balance: 0 }
        );
        assert_eq!(repo.credit("u1", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_only_moves_forward() {
        let repo = MemoryFileRepository::new();
        let file = UploadedFile::new("u1", "a.mp4", "user-u1/a.mp4", 1, "video/mp4");
        let id = file.id.clone();
        repo.insert(file);

        assert!(repo.update_status(&id, FileStatus::Processing, None).await.unwrap());
        assert!(!repo.update_status(&id, FileStatus::Queued, None).await.unwrap());
        assert!(!repo.update_status(&id, FileStatus::NoCredit, None).await.unwrap());
        assert!(repo.update_status(&id, FileStatus::Success, Some(2)).await.unwrap());
        assert!(!repo.update_status(&id, FileStatus::Failed, None).await.unwrap());

        let stored = repo.snapshot(&id).unwrap();
        assert_eq!(stored.status, FileStatus::Success);
        assert_eq!(stored.clip_count, 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let repo = MemoryCreditRepository::new();
        repo.set_balance("u1", 3);
        repo.fail_credits(2);

        assert!(repo.credit("u1", 1).await.is_err());
        assert!(repo.credit("u1", 1).await.is_err());
        assert_eq!(repo.credit("u1", 1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_clip_save_is_idempotent() {
        let repo = MemoryClipRepository::new();
        let clip = Clip::new("u1", FileId::from("f1"), "v.mp4", "user-u1/clips/f1_0.mp4");
        repo.save(&clip).await.unwrap();
        repo.save(&clip).await.unwrap();
        assert_eq!(repo.list_by_file(&FileId::from("f1")).await.unwrap().len(), 1);
    }
}
