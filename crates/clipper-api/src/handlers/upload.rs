//! Video upload handler.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use clipper_models::{AspectRatio, FileId, FileStatus, UploadedFile, VideoConfig};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::NewUpload;
use crate::state::AppState;

#[derive(Serialize)]
pub struct UploadResponse {
    pub id: FileId,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub status: FileStatus,
    pub message: String,
}

impl From<UploadedFile> for UploadResponse {
    fn from(file: UploadedFile) -> Self {
        Self {
            id: file.id,
            file_name: file.file_name,
            file_path: file.file_path,
            file_size: file.file_size,
            status: file.status,
            message: "File uploaded and queued for processing".to_string(),
        }
    }
}

/// Form fields other than the file itself.
#[derive(Debug, Default)]
struct ConfigFields {
    prompt: Option<String>,
    clip_count: Option<String>,
    aspect_ratio: Option<String>,
    target_width: Option<String>,
    target_height: Option<String>,
    subtitle: Option<String>,
}

impl ConfigFields {
    fn into_config(self) -> ApiResult<VideoConfig> {
        let defaults = VideoConfig::default();

        let clip_count = match self.clip_count {
            Some(s) => parse_field("clip_count", &s)?,
            None => defaults.clip_count,
        };
        let subtitle = match self.subtitle.as_deref().map(str::trim) {
            None | Some("") => defaults.subtitle,
            Some("true") | Some("1") | Some("on") => true,
            Some("false") | Some("0") | Some("off") => false,
            Some(other) => {
                return Err(ApiError::bad_request(format!("Invalid subtitle value: {}", other)))
            }
        };
        let prompt = self.prompt.unwrap_or_default();

        let config = match (self.aspect_ratio, self.target_width, self.target_height) {
            (Some(aspect), _, _) => {
                let aspect: AspectRatio = aspect
                    .parse()
                    .map_err(|e: clipper_models::ConfigError| ApiError::bad_request(e.to_string()))?;
                VideoConfig::for_aspect(prompt, clip_count, aspect, subtitle)
            }
            (None, Some(width), Some(height)) => VideoConfig {
                prompt,
                clip_count,
                target_width: parse_field("target_width", &width)?,
                target_height: parse_field("target_height", &height)?,
                subtitle,
            },
            (None, None, None) => {
                VideoConfig::for_aspect(prompt, clip_count, AspectRatio::default(), subtitle)
            }
            (None, _, _) => {
                return Err(ApiError::bad_request(
                    "target_width and target_height must be given together",
                ))
            }
        };

        Ok(config)
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {}: {}", name, value)))
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::bad_request(format!("Invalid multipart body: {}", e))
}

/// Read a file field, stopping as soon as it exceeds `max` bytes.
async fn read_limited(field: &mut Field<'_>, max: u64) -> ApiResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        let size = (data.len() + chunk.len()) as u64;
        if size > max {
            return Err(ApiError::PayloadTooLarge { size, max });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// `POST /api/v1/upload`
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let max = state.config.max_upload_size;
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut fields = ConfigFields::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = match read_limited(&mut field, max).await {
                    Ok(data) => data,
                    Err(e) => {
                        metrics::record_upload("rejected", 0);
                        return Err(e);
                    }
                };
                file = Some((file_name, content_type, data));
            }
            "prompt" => fields.prompt = Some(field.text().await.map_err(multipart_error)?),
            "clip_count" => fields.clip_count = Some(field.text().await.map_err(multipart_error)?),
            "aspect_ratio" => {
                fields.aspect_ratio = Some(field.text().await.map_err(multipart_error)?)
            }
            "target_width" => {
                fields.target_width = Some(field.text().await.map_err(multipart_error)?)
            }
            "target_height" => {
                fields.target_height = Some(field.text().await.map_err(multipart_error)?)
            }
            "subtitle" => fields.subtitle = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| ApiError::bad_request("File is required"))?;

    let upload = NewUpload {
        user_id: user.user_id,
        file_name,
        content_type,
        data,
        config: fields.into_config()?,
    };
    let size = upload.size();

    match state.admission.admit(upload).await {
        Ok(file) => {
            metrics::record_upload("queued", size);
            info!(file_id = %file.id, "Upload accepted");
            Ok((StatusCode::ACCEPTED, Json(file.into())))
        }
        Err(e) => {
            let outcome = match e {
                ApiError::AdmissionFailed(_) => "rolled_back",
                _ => "rejected",
            };
            metrics::record_upload(outcome, size);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_ratio_field() {
        let config = ConfigFields {
            aspect_ratio: Some("1:1".to_string()),
            clip_count: Some("5".to_string()),
            subtitle: Some("true".to_string()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!((config.target_width, config.target_height), (1080, 1080));
        assert_eq!(config.clip_count, 5);
        assert!(config.subtitle);
    }

    #[test]
    fn test_explicit_dimensions() {
        let config = ConfigFields {
            target_width: Some("720".to_string()),
            target_height: Some("1280".to_string()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!((config.target_width, config.target_height), (720, 1280));

        let half = ConfigFields {
            target_width: Some("720".to_string()),
            ..Default::default()
        };
        assert!(half.into_config().is_err());
    }

    #[test]
    fn test_defaults_and_bad_values() {
        let config = ConfigFields::default().into_config().unwrap();
        assert_eq!(config, VideoConfig::default());

        let bad = ConfigFields {
            clip_count: Some("many".to_string()),
            ..Default::default()
        };
        assert!(bad.into_config().is_err());

        let bad_aspect = ConfigFields {
            aspect_ratio: Some("2:1".to_string()),
            ..Default::default()
        };
        assert!(bad_aspect.into_config().is_err());
    }
}
