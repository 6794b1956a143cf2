use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::errors::AppError;
use crate::models::{UploadImageRequest, UploadImageResponse};
use crate::state::AppState;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/upload-image`: stores a base64 image and returns its URL
pub async fn upload_image_handler(
    State(state): State<AppState>,
    Json(body): Json<UploadImageRequest>,
) -> Response {
    match state.chats.upload_image(body.base64.as_deref()).await {
        Ok(url) => Json(UploadImageResponse { url }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/chats`: conversation previews, newest first
pub async fn list_chats_handler(State(state): State<AppState>) -> Response {
    match state.chats.get_conversations().await {
        Ok(previews) => Json(previews).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/chats/{id}`: one full conversation
pub async fn get_chat_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.chats.get_conversation(&id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

fn error_response(err: &AppError) -> Response {
    let (status, message) = if err.is_validation() {
        (StatusCode::BAD_REQUEST, "Image required".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Chat not found".to_string())
    } else if matches!(err, AppError::UploadFailed { .. }) {
        error!("Image upload failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Upload failed".to_string())
    } else {
        error!("Request failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    };
    (status, Json(json!({ "error": message }))).into_response()
}
