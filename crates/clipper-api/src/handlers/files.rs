//! Uploaded file listing.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use clipper_models::{FileId, FileStatus, UploadedFile};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct FileResponse {
    pub id: FileId,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub status: FileStatus,
    pub clip_count: u32,
    pub created_at: DateTime<Utc>,
}

impl From<UploadedFile> for FileResponse {
    fn from(file: UploadedFile) -> Self {
        Self {
            id: file.id,
            file_name: file.file_name,
            file_path: file.file_path,
            file_size: file.file_size,
            status: file.status,
            clip_count: file.clip_count,
            created_at: file.created_at,
        }
    }
}

/// `GET /api/v1/files/me`
pub async fn list_my_files(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let files = state.files.list_by_user(&user.user_id).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}
