//! Processing configuration sent with each job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Per-job processing configuration forwarded to the processing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct VideoConfig {
    /// Free-form guidance for clip selection
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub prompt: String,
    /// Number of clips to produce
    #[validate(range(min = 1, max = 10))]
    pub clip_count: u32,
    #[validate(range(min = 1, max = 4096))]
    pub target_width: u32,
    #[validate(range(min = 1, max = 4096))]
    pub target_height: u32,
    /// Burn subtitles into the output
    #[serde(default)]
    pub subtitle: bool,
}

impl VideoConfig {
    /// Build a configuration using the output size for an aspect ratio.
    pub fn for_aspect(
        prompt: impl Into<String>,
        clip_count: u32,
        aspect: AspectRatio,
        subtitle: bool,
    ) -> Self {
        let (target_width, target_height) = aspect.dimensions();
        Self {
            prompt: prompt.into(),
            clip_count,
            target_width,
            target_height,
            subtitle,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self::for_aspect("", 3, AspectRatio::default(), false)
    }
}

/// Output aspect ratios offered to uploaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    /// 9:16, short-form vertical
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    /// 3:4
    #[serde(rename = "3:4")]
    Classic,
    /// 16:9
    #[serde(rename = "16:9")]
    Landscape,
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// Target output size in pixels `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Classic => (1080, 1440),
            AspectRatio::Landscape => (1920, 1080),
            AspectRatio::Square => (1080, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Classic => "3:4",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "9:16" => Ok(AspectRatio::Portrait),
            "3:4" => Ok(AspectRatio::Classic),
            "16:9" => Ok(AspectRatio::Landscape),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(ConfigError::UnknownAspectRatio(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown aspect ratio: {0}, expected one of 9:16, 3:4, 16:9, 1:1")]
    UnknownAspectRatio(String),
}
