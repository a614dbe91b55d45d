use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Identity;
use crate::error::ChatError;
use crate::rooms::{CollaborationChange, RoomSummary};
use crate::state::AppState;

/// Header carrying the shared notification secret.
pub const NOTIFY_TOKEN_HEADER: &str = "x-notify-token";

/// GET /api/rooms: accepted rooms of the caller with the other participant.
pub async fn list_rooms(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<RoomSummary>>, ChatError> {
    let rooms = state.chat.list_rooms(identity.user_id()).await?;
    Ok(Json(rooms))
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    /// Users whose room list was invalidated
    pub affected: Vec<String>,
}

/// POST /api/collaborations/notify
///
/// Change notification from the collaboration workflow. Mirrors the record,
/// invalidates cached room lists and pushes `roomsChanged` to both sides.
pub async fn collaboration_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(change): Json<CollaborationChange>,
) -> Result<(StatusCode, Json<NotifyResponse>), Response> {
    if let Some(expected) = state.settings.notify_token.as_deref() {
        let provided = headers
            .get(NOTIFY_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            tracing::warn!("Rejected collaboration notification with bad token");
            return Err(StatusCode::UNAUTHORIZED.into_response());
        }
    }

    tracing::info!(
        collaboration_id = %change.collaboration.id,
        status = change.collaboration.status.as_str(),
        "Collaboration notification received"
    );

    let affected = state
        .chat
        .collaboration_changed(change)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((StatusCode::ACCEPTED, Json(NotifyResponse { affected })))
}
