/**
 * Offline Message Routes
 *
 * - `GET /messages/unread?uuid=&page=&limit=` - unread messages for `uuid`,
 *   oldest first; `page` starts at 1, `limit` is capped at 100
 * - `POST /messages/read` - body `{"uuid": ..., "message_ids": [...]}`,
 *   answers `{"updated": n}`
 */

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;
use crate::backend::services::{OfflineMessage, Services};

pub fn configure_message_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/messages/unread", get(list_unread))
        .route("/messages/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    pub uuid: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub uuid: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkReadResponse {
    pub updated: u64,
}

fn require_identity(uuid: Option<&str>) -> Result<&str, BackendError> {
    uuid.map(str::trim)
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| BackendError::handler(StatusCode::BAD_REQUEST, "uuid is required"))
}

pub async fn list_unread(
    State(services): State<Services>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<Vec<OfflineMessage>>, BackendError> {
    let target = require_identity(query.uuid.as_deref())?;
    let messages = services
        .offline
        .list_unread(target, query.page, query.limit)
        .await?;
    tracing::debug!("[Server] {} unread messages for {}", messages.len(), target);
    Ok(Json(messages))
}

pub async fn mark_read(
    State(services): State<Services>,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, BackendError> {
    let target = require_identity(Some(&request.uuid))?;
    if request.message_ids.is_empty() {
        return Ok(Json(MarkReadResponse { updated: 0 }));
    }
    let updated = services.offline.mark_read(target, &request.message_ids).await?;
    Ok(Json(MarkReadResponse { updated }))
}
