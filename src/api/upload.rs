//! Upload API endpoints (admin)
//!
//! - POST /api/upload - multipart/form-data with a `file` field and an
//!   optional `folder` field (default `products`)
//! - DELETE /api/upload - remove a stored object by key

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::MessageResponse;
use crate::api::middleware::{ApiError, ApiJson, AppState};
use crate::services::storage::StoredObject;

const DEFAULT_FOLDER: &str = "products";
/// Room for multipart boundaries and the text fields around the file
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct DeleteUploadRequest {
    pub key: String,
}

pub fn router(max_file_size: u64) -> Router<AppState> {
    let limit = usize::try_from(max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);
    Router::new()
        .route("/", post(upload_file).delete(delete_file))
        .layer(DefaultBodyLimit::max(limit))
}

/// POST /api/upload
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StoredObject>), ApiError> {
    let mut folder = DEFAULT_FOLDER.to_string();
    let mut file: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read multipart: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "folder" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation_error(format!("Invalid folder: {}", e)))?;
                if !value.trim().is_empty() {
                    folder = value;
                }
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;
                file = Some((data.to_vec(), content_type));
            }
            _ => continue,
        }
    }

    let (data, content_type) = file.ok_or_else(|| ApiError::validation_error("No file provided"))?;
    let stored = state
        .upload_service
        .upload(&folder, &data, &content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /api/upload
async fn delete_file(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<DeleteUploadRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.upload_service.delete(body.key.trim()).await?;
    Ok(Json(MessageResponse::new("File deleted")))
}
