//! REST surface for room history, sending and typing.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Identity;
use crate::chat::{Message, MessagePage, OutgoingMessage};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/chats/{chat_id}/messages?cursor=&limit=
pub async fn list_messages(
    State(state): State<AppState>,
    identity: Identity,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ChatError> {
    let page = state
        .chat
        .fetch_messages(
            identity.user_id(),
            &chat_id,
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(page))
}

/// POST /api/chats/{chat_id}/messages
/// Body: { "text": "...", "id"?: "...", "clientTimestamp"?: "..." }
pub async fn send_message(
    State(state): State<AppState>,
    identity: Identity,
    Path(chat_id): Path<String>,
    Json(body): Json<OutgoingMessage>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let message = state.chat.send_message(&identity, &chat_id, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/chats/{chat_id}/typing
pub async fn start_typing(
    State(state): State<AppState>,
    identity: Identity,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state.chat.set_typing(identity.user_id(), &chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/chats/{chat_id}/typing
pub async fn stop_typing(
    State(state): State<AppState>,
    identity: Identity,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state.chat.stop_typing(identity.user_id(), &chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
