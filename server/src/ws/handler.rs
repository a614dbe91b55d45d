use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::auth::middleware::Identity;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket upgrade. The identity token travels
/// as `?token=` since browsers cannot set headers on WebSocket requests.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// 4001 = token expired, 4002 = token invalid or missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=...
///
/// On a bad token the connection is upgraded and immediately closed with
/// the matching code; otherwise the connection actor takes over.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match params.token.as_deref() {
        Some(token) => jwt::validate_identity_token(&state.identity_secret, token).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            }
        }),
        None => Err((CLOSE_TOKEN_INVALID, "Token missing")),
    };

    match identity {
        Ok(identity) => {
            tracing::info!(
                user_id = %identity.user_id(),
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, identity))
        }
        Err((close_code, reason)) => {
            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

async fn handle_authenticated(socket: WebSocket, state: AppState, identity: Identity) {
    actor::run_connection(socket, state, identity).await;
}
