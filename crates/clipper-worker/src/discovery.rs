//! Finding the clips the processing service wrote.
//!
//! The service writes outputs next to the input under `clips/` and returns
//! nothing, so they are found by listing storage. Listings can lag behind
//! writes; the folder is listed a bounded number of times. The folder is
//! shared by every job of the same owner, so only entries whose file name
//! contains the input's identifier belong to this job.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use clipper_storage::{file_name_of, parent_folder, ArtifactStore, StorageResult};

use crate::metrics;

/// Folder the processing service writes clips for `input_path` into.
pub fn clips_folder(input_path: &str) -> String {
    match parent_folder(input_path) {
        "" => "clips".to_string(),
        parent => format!("{}/clips", parent),
    }
}

/// The input's unique identifier: its file name without extension.
pub fn job_identifier(input_path: &str) -> &str {
    let name = file_name_of(input_path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Keep listing entries whose file name contains `identifier`.
pub fn belonging_to(listing: Vec<String>, identifier: &str) -> Vec<String> {
    listing
        .into_iter()
        .filter(|path| file_name_of(path).contains(identifier))
        .collect()
}

pub struct ArtifactDiscovery {
    store: Arc<dyn ArtifactStore>,
    attempts: u32,
    delay: Duration,
}

impl ArtifactDiscovery {
    pub fn new(store: Arc<dyn ArtifactStore>, attempts: u32, delay: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Clip paths produced for `input_path`.
    ///
    /// Lists up to `attempts` times, pausing between attempts, and stops at
    /// the first non-empty listing. Filtering happens after listing, so a
    /// folder holding only other jobs' clips also ends the wait.
    pub async fn discover(&self, input_path: &str) -> StorageResult<Vec<String>> {
        let folder = clips_folder(input_path);
        let identifier = job_identifier(input_path);

        let mut listing = Vec::new();
        let mut attempt = 0;
        while attempt < self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;

            listing = self.store.list_files(&folder).await?;
            debug!(folder = %folder, attempt, entries = listing.len(), "Listed clips folder");
            if !listing.is_empty() {
                break;
            }
        }
        metrics::record_discovery_attempts(attempt);

        Ok(belonging_to(listing, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_storage::MemoryStore;

    #[test]
    fn test_clips_folder_and_identifier() {
        let path = "user-7/3f2a-holiday.mp4";
        assert_eq!(clips_folder(path), "user-7/clips");
        assert_eq!(job_identifier(path), "3f2a-holiday");
        assert_eq!(job_identifier("user-7/noext"), "noext");
        assert_eq!(job_identifier("user-7/archive.tar.gz"), "archive.tar");
        assert_eq!(clips_folder("top.mp4"), "clips");
    }

    #[test]
    fn test_filter_excludes_other_jobs() {
        let listing = vec![
            "user-7/clips/aaa-video_clip_1.mp4".to_string(),
            "user-7/clips/aaa-video_clip_2.mp4".to_string(),
            "user-7/clips/bbb-video_clip_1.mp4".to_string(),
        ];
        let mine = belonging_to(listing, "aaa-video");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|p| p.contains("aaa-video")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_non_empty_listing() {
        let store = Arc::new(MemoryStore::new());
        store.put("user-1/clips/abc-in_1.mp4", vec![1]);
        store.hide_listings(1);

        let discovery = ArtifactDiscovery::new(store.clone(), 3, Duration::from_secs(2));
        let found = discovery.discover("user-1/abc-in.mp4").await.unwrap();

        assert_eq!(found, vec!["user-1/clips/abc-in_1.mp4".to_string()]);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let store = Arc::new(MemoryStore::new());
        let discovery = ArtifactDiscovery::new(store.clone(), 3, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let found = discovery.discover("user-1/abc-in.mp4").await.unwrap();

        assert!(found.is_empty());
        assert_eq!(store.list_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_jobs_output_ends_wait_but_is_filtered() {
        let store = Arc::new(MemoryStore::new());
        store.put("user-1/clips/zzz-other_1.mp4", vec![1]);

        let discovery = ArtifactDiscovery::new(store.clone(), 3, Duration::from_secs(2));
        let found = discovery.discover("user-1/abc-in.mp4").await.unwrap();

        assert!(found.is_empty());
        assert_eq!(store.list_calls(), 1);
    }
}
