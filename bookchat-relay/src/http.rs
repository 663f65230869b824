//! REST endpoints: chat history, file upload, and file download.
//!
//! - `GET  /api/chat/messages?userId=..&bookingId=..&gigId=..` → `[ChatMessage]`
//! - `POST /api/chat/upload` (multipart field `file`) → `{"url": ..}`
//! - `GET  /files/{id}` → the stored bytes

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use bookchat_proto::message::{BookingId, ChatMessage, GigId};
use bookchat_proto::scope::RoomScope;

use crate::relay::RelayState;
use crate::store::StoredFile;

/// Errors returned by the REST handlers as `{"error": ..}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The request is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The requested resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The multipart body could not be read (including size limit breaches).
    #[error(transparent)]
    Upload(#[from] MultipartError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Upload(e) => (e.status(), e.body_text()),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Routes for the REST endpoints, with the upload body limit from `state`.
pub fn router(state: &RelayState) -> Router<Arc<RelayState>> {
    Router::new()
        .route("/api/chat/messages", get(list_messages))
        .route(
            "/api/chat/upload",
            post(upload_file).layer(DefaultBodyLimit::max(state.max_upload_size)),
        )
        .route("/files/{id}", get(download_file))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    booking_id: Option<String>,
    #[serde(default)]
    gig_id: Option<String>,
}

/// GET /api/chat/messages: room history in acceptance order
async fn list_messages(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let scope = RoomScope::new(
        query
            .booking_id
            .filter(|id| !id.is_empty())
            .map(BookingId::new),
        query.gig_id.filter(|id| !id.is_empty()).map(GigId::new),
    );
    let room = scope
        .room()
        .ok_or_else(|| AppError::BadRequest("bookingId or gigId is required".to_string()))?;

    let messages = state.history.list(&room).await;
    tracing::debug!(
        %room,
        user_id = query.user_id.as_deref().unwrap_or(""),
        count = messages.len(),
        "history requested"
    );
    Ok(Json(messages))
}

/// POST /api/chat/upload: store the `file` field and return its URL
async fn upload_file(
    State(state): State<Arc<RelayState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::BadRequest("uploaded file is empty".to_string()));
        }

        let size = bytes.len();
        let id = state
            .files
            .put(StoredFile {
                file_name: file_name.clone(),
                content_type,
                bytes: bytes.to_vec(),
            })
            .await;
        let url = format!("{}/files/{id}", state.public_url());
        tracing::info!(%file_name, size, %url, "file stored");

        return Ok(Json(serde_json::json!({ "url": url })));
    }
    Err(AppError::BadRequest("missing `file` field".to_string()))
}

/// GET /files/{id}: stored file contents
async fn download_file(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let file = state
        .files
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no file {id}")))?;
    let content_type = file
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disposition = format!("inline; filename=\"{}\"", file.file_name.replace('"', ""));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}
