//! JSON frames exchanged over `/ws` and their dispatch onto the chat service.
//!
//! Frames are internally tagged by `type` with camelCase names, e.g.
//! `{"type":"sendMessage","requestId":"7","chatId":"A-B","text":"Hello"}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Identity;
use crate::chat::store::Cursor;
use crate::chat::{Message, OutgoingMessage};
use crate::error::ChatError;
use crate::rooms::RoomSummary;
use crate::state::AppState;
use crate::ws::ConnectionHandle;

/// A client command with its optional correlation id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    ListRooms,
    FetchMessages {
        chat_id: String,
        #[serde(default)]
        cursor: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    SendMessage {
        chat_id: String,
        text: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        sender_id: Option<String>,
        #[serde(default)]
        client_timestamp: Option<String>,
    },
    SetTyping {
        chat_id: String,
    },
    StopTyping {
        chat_id: String,
    },
    Subscribe {
        chat_id: String,
    },
    Unsubscribe {
        subscription_id: Uuid,
    },
    Ping,
}

/// Everything the server writes to a connection: replies carry the
/// request id of the command they answer, pushed events carry none.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Connected {
        user_id: String,
        connection_id: Uuid,
    },
    Rooms {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        rooms: Vec<RoomSummary>,
    },
    Messages {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        chat_id: String,
        messages: Vec<Message>,
        next_cursor: Option<Cursor>,
        has_more: bool,
    },
    MessageSent {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message: Message,
    },
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        chat_id: String,
        subscription_id: Uuid,
    },
    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        subscription_id: Uuid,
        removed: bool,
    },
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
        retryable: bool,
    },
    Message {
        chat_id: String,
        message: Message,
    },
    Typing {
        chat_id: String,
        user_id: String,
    },
    StopTyping {
        chat_id: String,
        user_id: String,
    },
    RoomsChanged {
        user_id: String,
    },
    /// Sent to a connection just before it is closed for a newer one.
    Superseded {
        /// Always `connection_superseded`
        code: String,
        connection_id: Uuid,
    },
}

impl ServerEvent {
    pub fn error(request_id: Option<String>, err: &ChatError) -> Self {
        ServerEvent::Error {
            request_id,
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Decode a text frame and answer it on `handle`.
pub async fn handle_text_message(
    text: &str,
    handle: &ConnectionHandle,
    state: &AppState,
    identity: &Identity,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %identity.user_id(),
                error = %e,
                "Failed to decode client frame"
            );
            handle.send(ServerEvent::error(
                None,
                &ChatError::InvalidMessage(format!("undecodable frame: {}", e)),
            ));
            return;
        }
    };

    let request_id = frame.request_id;
    let reply = match dispatch(frame.command, request_id.clone(), handle, state, identity).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::debug!(
                user_id = %identity.user_id(),
                code = err.code(),
                "Command rejected"
            );
            ServerEvent::error(request_id, &err)
        }
    };
    handle.send(reply);
}

async fn dispatch(
    command: ClientCommand,
    request_id: Option<String>,
    handle: &ConnectionHandle,
    state: &AppState,
    identity: &Identity,
) -> Result<ServerEvent, ChatError> {
    let chat = &state.chat;
    let user_id = identity.user_id();

    match command {
        ClientCommand::ListRooms => {
            let rooms = chat.list_rooms(user_id).await?;
            Ok(ServerEvent::Rooms { request_id, rooms })
        }
        ClientCommand::FetchMessages {
            chat_id,
            cursor,
            limit,
        } => {
            let page = chat
                .fetch_messages(user_id, &chat_id, cursor.as_deref(), limit)
                .await?;
            Ok(ServerEvent::Messages {
                request_id,
                chat_id,
                messages: page.messages,
                next_cursor: page.next_cursor,
                has_more: page.has_more,
            })
        }
        ClientCommand::SendMessage {
            chat_id,
            text,
            id,
            sender_id,
            client_timestamp,
        } => {
            let outgoing = OutgoingMessage {
                text,
                id,
                sender_id,
                client_timestamp,
            };
            let message = chat.send_message(identity, &chat_id, outgoing).await?;
            Ok(ServerEvent::MessageSent {
                request_id,
                message,
            })
        }
        ClientCommand::SetTyping { chat_id } => {
            chat.set_typing(user_id, &chat_id).await?;
            Ok(ServerEvent::Ack { request_id })
        }
        ClientCommand::StopTyping { chat_id } => {
            chat.stop_typing(user_id, &chat_id).await?;
            Ok(ServerEvent::Ack { request_id })
        }
        ClientCommand::Subscribe { chat_id } => {
            let subscription = chat.subscribe(user_id, handle.id, &chat_id).await?;
            Ok(ServerEvent::Subscribed {
                request_id,
                chat_id,
                subscription_id: subscription.id,
            })
        }
        ClientCommand::Unsubscribe { subscription_id } => {
            let removed = chat.unsubscribe(user_id, subscription_id);
            Ok(ServerEvent::Unsubscribed {
                request_id,
                subscription_id,
                removed,
            })
        }
        ClientCommand::Ping => Ok(ServerEvent::Pong { request_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_commands_with_request_ids() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "fetchMessages",
            "requestId": "r1",
            "chatId": "A-B",
            "limit": 20
        }))
        .unwrap();
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        assert_eq!(
            frame.command,
            ClientCommand::FetchMessages {
                chat_id: "A-B".to_string(),
                cursor: None,
                limit: Some(20),
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"listRooms"}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert_eq!(frame.command, ClientCommand::ListRooms);
    }

    #[test]
    fn send_message_fields_are_camel_case() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "sendMessage",
            "chatId": "A-B",
            "text": "Hello",
            "clientTimestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        match frame.command {
            ClientCommand::SendMessage {
                client_timestamp, ..
            } => assert_eq!(client_timestamp.as_deref(), Some("2024-05-01T10:00:00Z")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"deleteMessage"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"chatId":"A-B"}"#).is_err());
    }

    #[test]
    fn events_serialize_tagged() {
        let value = serde_json::to_value(ServerEvent::StopTyping {
            chat_id: "A-B".to_string(),
            user_id: "A".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "stopTyping", "chatId": "A-B", "userId": "A"})
        );

        let value = serde_json::to_value(ServerEvent::error(
            Some("r9".to_string()),
            &ChatError::StoreUnavailable,
        ))
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["requestId"], "r9");
        assert_eq!(value["code"], "store_unavailable");
        assert_eq!(value["retryable"], true);

        let value = serde_json::to_value(ServerEvent::Pong { request_id: None }).unwrap();
        assert_eq!(value, json!({"type": "pong"}));
    }
}
