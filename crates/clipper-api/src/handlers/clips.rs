//! Clip listing, signed URLs and download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use clipper_models::{Clip, FileId};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ClipResponse {
    pub id: String,
    pub uploaded_file_id: FileId,
    pub source_name: String,
    pub file_path: String,
    /// Empty when a URL could not be signed
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

impl ClipResponse {
    fn new(clip: Clip, download_url: String) -> Self {
        Self {
            id: clip.id,
            uploaded_file_id: clip.uploaded_file_id,
            source_name: clip.source_name,
            file_path: clip.file_path,
            download_url,
            created_at: clip.created_at,
        }
    }
}

/// Load a clip the caller owns. Soft-deleted clips are not found.
async fn owned_clip(state: &AppState, user: &AuthUser, clip_id: &str) -> ApiResult<Clip> {
    let clip = state
        .clips
        .get(clip_id)
        .await?
        .filter(|c| !c.is_deleted())
        .ok_or_else(|| ApiError::not_found(format!("Clip {}", clip_id)))?;

    if clip.user_id != user.user_id {
        return Err(ApiError::forbidden("Clip does not belong to user"));
    }
    Ok(clip)
}

/// `GET /api/v1/clips/me`
pub async fn list_my_clips(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<ClipResponse>>> {
    let clips = state.clips.list_by_user(&user.user_id).await?;
    let ttl = state.config.signed_url_ttl;

    let mut responses = Vec::with_capacity(clips.len());
    for clip in clips.into_iter().filter(|c| !c.is_deleted()) {
        let url = match state.store.signed_url(&clip.file_path, ttl).await {
            Ok(url) => url,
            Err(e) => {
                warn!(clip_id = %clip.id, "Failed to sign clip URL: {}", e);
                String::new()
            }
        };
        responses.push(ClipResponse::new(clip, url));
    }

    Ok(Json(responses))
}

/// `GET /api/v1/clips/:clip_id`
pub async fn get_clip(
    State(state): State<AppState>,
    user: AuthUser,
    Path(clip_id): Path<String>,
) -> ApiResult<Json<ClipResponse>> {
    let clip = owned_clip(&state, &user, &clip_id).await?;
    let url = state
        .store
        .signed_url(&clip.file_path, state.config.signed_url_ttl)
        .await?;
    Ok(Json(ClipResponse::new(clip, url)))
}

/// `GET /api/v1/clips/:clip_id/download`
pub async fn download_clip(
    State(state): State<AppState>,
    user: AuthUser,
    Path(clip_id): Path<String>,
) -> ApiResult<Response> {
    let clip = owned_clip(&state, &user, &clip_id).await?;
    let bytes = state.store.download(&clip.file_path).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        clip.file_name().replace('"', "")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}
