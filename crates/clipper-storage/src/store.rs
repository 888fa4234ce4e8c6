//! Artifact store contract and path helpers.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;

/// Binary object storage under hierarchical paths.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `data` for `owner_id` and return the storage path.
    async fn upload(
        &self,
        data: Vec<u8>,
        file_name: &str,
        owner_id: &str,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Delete the object at `path`.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// List object paths directly under `folder`.
    async fn list_files(&self, folder: &str) -> StorageResult<Vec<String>>;

    /// Fetch an object's bytes.
    async fn download(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Create a time-limited download URL.
    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String>;
}

/// Storage key for a new upload: `user-{owner}/{uuid}-{file_name}`.
pub fn upload_key(owner_id: &str, file_name: &str) -> String {
    let safe_name: String = file_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("user-{}/{}-{}", owner_id, Uuid::new_v4(), safe_name)
}

/// Directory portion of a storage path, without trailing slash.
///
/// Returns an empty string for top-level paths.
pub fn parent_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// File name portion of a storage path.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub(crate) fn folder_prefix(folder: &str) -> String {
    let trimmed = folder.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
