//! Uploaded file records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted upload size (50 MB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// MIME types accepted for upload.
pub const ALLOWED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
];

/// Unique identifier for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status of an uploaded file.
///
/// Status only moves forward: `uploaded -> queued -> processing -> {success, failed}`,
/// with `no_credit` reachable before `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Stored and recorded, not yet queued
    #[default]
    Uploaded,
    /// Job message accepted by the queue
    Queued,
    /// Credit debited, external processing in progress
    Processing,
    /// Clips were produced and recorded
    Success,
    /// Processing failed; any debit was refunded
    Failed,
    /// Owner had no credit; nothing was charged
    NoCredit,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
            FileStatus::NoCredit => "no_credit",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(FileStatus::Uploaded),
            "queued" => Some(FileStatus::Queued),
            "processing" => Some(FileStatus::Processing),
            "success" => Some(FileStatus::Success),
            "failed" => Some(FileStatus::Failed),
            "no_credit" => Some(FileStatus::NoCredit),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no further automatic transition).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Success | FileStatus::Failed | FileStatus::NoCredit
        )
    }

    fn rank(&self) -> u8 {
        match self {
            FileStatus::Uploaded => 0,
            FileStatus::Queued => 1,
            FileStatus::Processing => 2,
            FileStatus::Success | FileStatus::Failed | FileStatus::NoCredit => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: FileStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == FileStatus::NoCredit {
            // no_credit is decided before any charge, never mid-processing
            return self.rank() < FileStatus::Processing.rank();
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded media object and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: FileId,
    /// Owner user ID
    pub user_id: String,
    /// Display name as uploaded
    pub file_name: String,
    /// Object storage key
    pub file_path: String,
    /// Size in bytes
    pub file_size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    /// Number of clips produced
    pub clip_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadedFile {
    /// Create a new record in the `uploaded` state.
    pub fn new(
        user_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FileId::new(),
            user_id: user_id.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            file_size,
            mime_type: mime_type.into(),
            status: FileStatus::Uploaded,
            clip_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_valid_size(&self) -> bool {
        self.file_size > 0 && self.file_size <= MAX_FILE_SIZE
    }

    pub fn is_video(&self) -> bool {
        is_allowed_video_type(&self.mime_type)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Check a MIME type against the accepted video types.
pub fn is_allowed_video_type(mime_type: &str) -> bool {
    let base = mime_type.split(';').next().unwrap_or("").trim();
    ALLOWED_VIDEO_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FileStatus::Success.is_terminal());
        assert!(FileStatus::Failed.is_terminal());
        assert!(FileStatus::NoCredit.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
        assert!(!FileStatus::Queued.is_terminal());
    }

    #[test]
    fn test_status_only_advances() {
        assert!(FileStatus::Uploaded.can_advance_to(FileStatus::Queued));
        assert!(FileStatus::Queued.can_advance_to(FileStatus::Processing));
        assert!(FileStatus::Queued.can_advance_to(FileStatus::NoCredit));
        assert!(FileStatus::Processing.can_advance_to(FileStatus::Failed));
        assert!(!FileStatus::Processing.can_advance_to(FileStatus::NoCredit));
        assert!(!FileStatus::Processing.can_advance_to(FileStatus::Queued));
        assert!(!FileStatus::Success.can_advance_to(FileStatus::Failed));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&FileStatus::NoCredit).unwrap();
        assert_eq!(json, "\"no_credit\"");
        assert_eq!(FileStatus::parse("no_credit"), Some(FileStatus::NoCredit));
        assert_eq!(FileStatus::parse("done"), None);
    }

    #[test]
    fn test_upload_validation() {
        let file = UploadedFile::new("u1", "a.mp4", "user-u1/x-a.mp4", 1024, "video/mp4");
        assert!(file.is_valid_size());
        assert!(file.is_video());
        assert_eq!(file.status, FileStatus::Uploaded);

        let big = UploadedFile::new("u1", "a.mp4", "p", MAX_FILE_SIZE + 1, "video/mp4");
        assert!(!big.is_valid_size());

        assert!(is_allowed_video_type("video/quicktime; codecs=avc1"));
        assert!(!is_allowed_video_type("image/png"));
    }
}
