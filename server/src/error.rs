//! Error taxonomy shared by the REST and WebSocket surfaces.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors surfaced to callers of the chat service.
///
/// Only `StoreUnavailable` is retryable; everything else is terminal for the
/// request that produced it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("caller is not a participant of this room")]
    UnauthorizedRoom,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("message store is temporarily unavailable")]
    StoreUnavailable,

    #[error("connection was superseded by a newer session")]
    ConnectionSuperseded,

    #[error("no accepted collaboration for chat {0}")]
    RoomNotFound(String),
}

impl ChatError {
    /// Stable wire code used in error frames and JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::UnauthorizedRoom => "unauthorized_room",
            ChatError::InvalidMessage(_) => "invalid_message",
            ChatError::StoreUnavailable => "store_unavailable",
            ChatError::ConnectionSuperseded => "connection_superseded",
            ChatError::RoomNotFound(_) => "room_not_found",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::StoreUnavailable)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::UnauthorizedRoom => StatusCode::FORBIDDEN,
            ChatError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            ChatError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::ConnectionSuperseded => StatusCode::CONFLICT,
            ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// JSON body for an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Failure reported by a persistence collaborator (message store or
/// collaboration directory).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("message id {0} already belongs to another sender")]
    IdConflict(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(ChatError::StoreUnavailable.is_retryable());
        assert!(!ChatError::UnauthorizedRoom.is_retryable());
        assert!(!ChatError::InvalidMessage("empty".into()).is_retryable());
        assert!(!ChatError::RoomNotFound("x".into()).is_retryable());
        assert!(!ChatError::ConnectionSuperseded.is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ChatError::UnauthorizedRoom.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ChatError::RoomNotFound("A-B".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChatError::StoreUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn body_carries_code_and_retry_hint() {
        let body = ChatError::StoreUnavailable.body();
        assert_eq!(body.code, "store_unavailable");
        assert!(body.retryable);
    }
}
