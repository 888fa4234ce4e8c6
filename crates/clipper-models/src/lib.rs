//! Shared data models for the clip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Uploaded files and their processing status
//! - Clips discovered after processing
//! - Processing configuration
//! - Queue message schemas and live events

pub mod clip;
pub mod config;
pub mod event;
pub mod file;
pub mod message;

// Re-export common types
pub use clip::Clip;
pub use config::{AspectRatio, ConfigError, VideoConfig};
pub use event::LiveEvent;
pub use file::{is_allowed_video_type, FileId, FileStatus, UploadedFile, ALLOWED_VIDEO_TYPES, MAX_FILE_SIZE};
pub use message::{EmailNotificationMessage, StatusUpdateMessage, VideoProcessingMessage};
