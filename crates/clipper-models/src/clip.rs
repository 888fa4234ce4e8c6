//! Clip records produced by processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file::FileId;

/// A derived artifact discovered in storage after processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    /// Owner user ID
    pub user_id: String,
    /// Back-reference to the source upload
    pub uploaded_file_id: FileId,
    /// Display name of the source upload
    pub source_name: String,
    /// Object storage key
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Clip {
    /// Create a clip for an artifact path.
    ///
    /// The ID is derived from the source file and the artifact path, so
    /// recording the same artifact twice yields the same clip.
    pub fn new(
        user_id: impl Into<String>,
        uploaded_file_id: FileId,
        source_name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        Self {
            id: Self::id_for(&uploaded_file_id, &file_path),
            user_id: user_id.into(),
            uploaded_file_id,
            source_name: source_name.into(),
            file_path,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Deterministic clip ID for `(file, path)`.
    pub fn id_for(uploaded_file_id: &FileId, file_path: &str) -> String {
        let name = format!("{}/{}", uploaded_file_id, file_path);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    /// File name portion of the storage path.
    pub fn file_name(&self) -> &str {
        self.file_path.rsplit('/').next().unwrap_or(&self.file_path)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_id_is_stable() {
        let file_id = FileId::from("f1");
        let a = Clip::new("u1", file_id.clone(), "video.mp4", "user-u1/clips/f1_0.mp4");
        let b = Clip::new("u1", file_id.clone(), "video.mp4", "user-u1/clips/f1_0.mp4");
        let c = Clip::new("u1", file_id, "video.mp4", "user-u1/clips/f1_1.mp4");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.file_name(), "f1_0.mp4");
        assert!(!a.is_deleted());
    }
}
