//! Queue message schemas.
//!
//! These are the JSON bodies carried on the `video_processing`,
//! `status_update` and `email_notification` queues.

use serde::{Deserialize, Serialize};

use crate::config::VideoConfig;
use crate::file::{FileId, FileStatus};

/// A request to process one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProcessingMessage {
    pub file_id: FileId,
    pub user_id: String,
    pub file_path: String,
    pub config: VideoConfig,
}

/// Status change notification for an uploaded file.
///
/// Best-effort: consumers must tolerate duplicates and reordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdateMessage {
    pub file_id: FileId,
    pub user_id: String,
    pub status: FileStatus,
    #[serde(default)]
    pub clip_count: u32,
}

impl StatusUpdateMessage {
    pub fn new(
        file_id: FileId,
        user_id: impl Into<String>,
        status: FileStatus,
        clip_count: u32,
    ) -> Self {
        Self {
            file_id,
            user_id: user_id.into(),
            status,
            clip_count,
        }
    }
}

/// Outbound email request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotificationMessage {
    /// Template kind, e.g. `verification` or `password_reset`
    #[serde(rename = "type")]
    pub kind: String,
    pub to: String,
    pub username: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_message_wire_format() {
        let msg = VideoProcessingMessage {
            file_id: FileId::from("f1"),
            user_id: "u1".into(),
            file_path: "user-u1/abc-video.mp4".into(),
            config: VideoConfig::default(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["file_id"], "f1");
        assert_eq!(value["config"]["clip_count"], 3);
        assert_eq!(value["config"]["target_height"], 1920);
        assert_eq!(value["config"]["subtitle"], false);
    }

    #[test]
    fn test_email_type_field() {
        let json = r#"{"type":"verification","to":"a@b.c","username":"ann","content":"tok"}"#;
        let msg: EmailNotificationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, "verification");
    }
}
