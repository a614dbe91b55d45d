//! Connection Registry: one live WebSocket connection per user.

pub mod actor;
pub mod dedup;
pub mod handler;
pub mod protocol;

use axum::body::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::chat::Message;
use crate::error::ChatError;
use dedup::RecentIds;
use protocol::ServerEvent;

/// Close code sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4009;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
}

/// Cloneable handle to one live connection.
///
/// Anything in the process can push to the client through it; the actor
/// owning the socket drains the queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    sender: mpsc::UnboundedSender<Outbound>,
    shutdown: Arc<Notify>,
    recent: RecentIds,
}

impl ConnectionHandle {
    pub fn new(user_id: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            sender,
            shutdown: Arc::new(Notify::new()),
            recent: RecentIds::default(),
        };
        (handle, rx)
    }

    /// Queue an event. False if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(Outbound::Event(event)).is_ok()
    }

    pub fn send_frame(&self, frame: Outbound) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// Push a message event unless this connection was already sent `id`.
    pub fn push_message(&self, message: &Message) -> bool {
        if !self.recent.insert(&message.id) {
            tracing::debug!(
                connection_id = %self.id,
                message_id = %message.id,
                "Skipping duplicate live push"
            );
            return false;
        }
        self.send(ServerEvent::Message {
            chat_id: message.chat_id.clone(),
            message: message.clone(),
        })
    }

    /// Queue a close frame and wake the connection's reader.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.shutdown.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.shutdown.notified().await
    }
}

/// user_id -> the single registered connection for that user.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    handles: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` as the user's connection. A previous handle is told it
    /// was superseded and closed, and returned.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id;
        let previous = self
            .handles
            .insert(user_id.to_string(), handle)
            .filter(|old| old.id != connection_id);

        match &previous {
            Some(old) => {
                let reason = ChatError::ConnectionSuperseded;
                old.send(ServerEvent::Superseded {
                    code: reason.code().to_string(),
                    connection_id,
                });
                old.close(CLOSE_SUPERSEDED, &reason.to_string());
                tracing::info!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    superseded = %old.id,
                    "Connection superseded"
                );
            }
            None => {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    "Connection registered"
                );
            }
        }

        previous
    }

    /// Remove the user's entry only if it is still `handle`. Returns whether
    /// anything was removed.
    pub fn unregister(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        let removed = self
            .handles
            .remove_if(user_id, |_, current| current.id == handle.id)
            .is_some();
        if removed {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %handle.id,
                "Connection unregistered"
            );
        }
        removed
    }

    pub fn get_handle(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.handles.get(user_id).map(|h| h.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.handles.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
