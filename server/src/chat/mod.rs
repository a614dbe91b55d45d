//! Chat core: message log, typing coordination and live delivery.

pub mod broadcast;
pub mod messages;
pub mod routes;
pub mod service;
pub mod store;
pub mod typing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use broadcast::{Broadcaster, RoomEvent, Subscription};
pub use messages::MessageAdapter;
pub use service::ChatService;
pub use store::{Cursor, MessageStore, SqliteMessageStore};
pub use typing::{TypingCoordinator, TypingEdge};

/// A stored, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// Denormalized from the sender's identity at send time
    pub sender_name: String,
    pub text: String,
    /// Canonical server receipt time; the order key within a room
    pub timestamp: DateTime<Utc>,
    /// Time reported by the sending client, kept for display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<String>,
    /// Resume point for `fetchMessages` after this message
    pub cursor: Cursor,
}

/// Message submitted by a participant, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub text: String,
    /// Client-generated id; doubles as the de-duplication key
    #[serde(default)]
    pub id: Option<String>,
    /// If present it must match the caller's identity
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub client_timestamp: Option<String>,
}

/// Validated message ready to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub id: Option<String>,
    pub client_timestamp: Option<String>,
}

/// One page of history in canonical order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor of the last returned message (or the request cursor when the
    /// page is empty); pass it back to continue.
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}
