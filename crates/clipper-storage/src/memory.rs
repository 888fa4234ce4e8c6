//! In-memory artifact store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::{folder_prefix, upload_key, ArtifactStore};

/// Process-local object store.
///
/// Can simulate listing lag: `hide_listings(n)` makes the next `n`
/// listings come back empty even when objects exist.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    hidden_listings: AtomicU32,
    list_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write an object at an explicit path.
    pub fn put(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects().insert(path.into(), data.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects().contains_key(path)
    }

    /// All stored paths in lexical order.
    pub fn paths(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Make the next `n` listings return nothing.
    pub fn hide_listings(&self, n: u32) {
        self.hidden_listings.store(n, Ordering::SeqCst);
    }

    /// Number of `list_files` calls made so far.
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn upload(
        &self,
        data: Vec<u8>,
        file_name: &str,
        owner_id: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        let key = upload_key(owner_id, file_name);
        self.put(key.clone(), data);
        Ok(key)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.objects().remove(path);
        Ok(())
    }

    async fn list_files(&self, folder: &str) -> StorageResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let hidden = self
            .hidden_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if hidden.is_ok() {
            return Ok(Vec::new());
        }

        let prefix = folder_prefix(folder);
        Ok(self
            .objects()
            .keys()
            .filter(|key| key.starts_with(&prefix) && !key[prefix.len()..].contains('/'))
            .cloned()
            .collect())
    }

    async fn download(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.objects()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        if !self.contains(path) {
            return Err(StorageError::not_found(path));
        }
        Ok(format!("memory://{}?expires_in={}", path, ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let store = MemoryStore::new();
        store.put("user-1/clips/a_0.mp4", "x");
        store.put("user-1/clips/nested/b.mp4", "x");
        store.put("user-1/video.mp4", "x");

        let listed = store.list_files("user-1/clips").await.unwrap();
        assert_eq!(listed, vec!["user-1/clips/a_0.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_hidden_listings_expire() {
        let store = MemoryStore::new();
        store.put("f/a.mp4", "x");
        store.hide_listings(2);

        assert!(store.list_files("f").await.unwrap().is_empty());
        assert!(store.list_files("f").await.unwrap().is_empty());
        assert_eq!(store.list_files("f").await.unwrap().len(), 1);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_upload_then_delete() {
        let store = MemoryStore::new();
        let path = store
            .upload(b"data".to_vec(), "v.mp4", "7", "video/mp4")
            .await
            .unwrap();
        assert!(path.starts_with("user-7/"));
        assert_eq!(store.download(&path).await.unwrap(), b"data");

        store.delete(&path).await.unwrap();
        assert!(!store.contains(&path));
        assert!(store.download(&path).await.is_err());
    }
}
