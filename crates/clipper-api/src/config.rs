//! API configuration.

use std::time::Duration;

use clipper_models::MAX_FILE_SIZE;

use crate::error::{ApiError, ApiResult};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Largest accepted video, in bytes
    pub max_upload_size: u64,
    /// HS256 secret for access tokens
    pub jwt_secret: String,
    /// Publish attempts before an upload is rolled back
    pub publish_attempts: u32,
    /// Pause between publish attempts
    pub publish_backoff: Duration,
    /// Buffered events per live connection
    pub live_channel_capacity: usize,
    /// Lifetime of signed clip URLs
    pub signed_url_ttl: Duration,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            max_upload_size: MAX_FILE_SIZE,
            jwt_secret: String::new(),
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(500),
            live_channel_capacity: 10,
            signed_url_ttl: Duration::from_secs(3600),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    ///
    /// `JWT_SECRET` is required.
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::config_error("JWT_SECRET is required"))?;

        Ok(Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_upload_size: env_parse("MAX_UPLOAD_SIZE").unwrap_or(defaults.max_upload_size),
            jwt_secret,
            publish_attempts: env_parse("PUBLISH_ATTEMPTS").unwrap_or(defaults.publish_attempts),
            publish_backoff: std::env::var("PUBLISH_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_backoff),
            live_channel_capacity: env_parse("LIVE_CHANNEL_CAPACITY")
                .unwrap_or(defaults.live_channel_capacity),
            signed_url_ttl: std::env::var("SIGNED_URL_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.signed_url_ttl),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        })
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
