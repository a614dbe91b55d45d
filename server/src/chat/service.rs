use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::auth::middleware::Identity;
use crate::chat::store::{Cursor, MessageStore, SqliteMessageStore};
use crate::chat::{
    Broadcaster, Message, MessageAdapter, MessagePage, NewMessage, OutgoingMessage, RoomEvent,
    Subscription, TypingCoordinator,
};
use crate::config::ChatSettings;
use crate::db::DbPool;
use crate::error::ChatError;
use crate::rooms::{CollaborationChange, CollaborationSource, RoomIndex, RoomSummary, SqliteDirectory};
use crate::ws::ConnectionRegistry;

/// Entry point shared by the REST handlers and the WebSocket protocol.
#[derive(Clone)]
pub struct ChatService {
    rooms: RoomIndex,
    messages: MessageAdapter,
    typing: TypingCoordinator,
    broadcaster: Broadcaster,
    /// Ordered live delivery, shared with the typing coordinator
    events: mpsc::UnboundedSender<RoomEvent>,
    /// Serializes append + enqueue per room; entries live only while held
    room_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ChatService {
    /// Service backed by the local SQLite mirror and message log.
    pub fn new(db: DbPool, registry: ConnectionRegistry, settings: &ChatSettings) -> Self {
        Self::with_parts(
            Arc::new(SqliteDirectory::new(db.clone())),
            Arc::new(SqliteMessageStore::new(db)),
            registry,
            settings,
        )
    }

    /// Assemble the service from explicit collaborators. Must be called
    /// inside a tokio runtime: it spawns the delivery task.
    pub fn with_parts(
        source: Arc<dyn CollaborationSource>,
        store: Arc<dyn MessageStore>,
        registry: ConnectionRegistry,
        settings: &ChatSettings,
    ) -> Self {
        let rooms = RoomIndex::new(source);
        let messages = MessageAdapter::new(store, rooms.clone(), settings);
        let broadcaster = Broadcaster::new(registry, rooms.clone());
        let (events, queue) = mpsc::unbounded_channel();
        let typing = TypingCoordinator::new(settings.typing_quiet, events.clone());
        broadcaster.spawn_delivery(queue);

        Self {
            rooms,
            messages,
            typing,
            broadcaster,
            events,
            room_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    pub fn messages(&self) -> &MessageAdapter {
        &self.messages
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub async fn list_rooms(&self, user_id: &str) -> Result<Vec<RoomSummary>, ChatError> {
        self.rooms.room_summaries(user_id).await
    }

    pub async fn fetch_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ChatError> {
        self.rooms.require_participant(user_id, chat_id).await?;

        let cursor = match cursor.map(str::trim).filter(|c| !c.is_empty()) {
            Some(raw) => Some(
                raw.parse::<Cursor>()
                    .map_err(|e| ChatError::InvalidMessage(e.to_string()))?,
            ),
            None => None,
        };

        self.messages.list_since(chat_id, cursor, limit).await
    }

    /// Persist a message from `identity` and push it to the room.
    ///
    /// The sender's typing indicator is cleared and its stop edge queued
    /// ahead of the message, behind any edge already queued for the room.
    pub async fn send_message(
        &self,
        identity: &Identity,
        chat_id: &str,
        outgoing: OutgoingMessage,
    ) -> Result<Message, ChatError> {
        let user_id = identity.user_id();
        if let Some(claimed) = outgoing.sender_id.as_deref() {
            if claimed != user_id {
                tracing::warn!(
                    user_id = %user_id,
                    claimed = %claimed,
                    chat_id = %chat_id,
                    "Sender id does not match caller identity"
                );
                return Err(ChatError::UnauthorizedRoom);
            }
        }

        self.rooms.require_participant(user_id, chat_id).await?;

        let lock = self.room_lock(chat_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_and_enqueue(identity, chat_id, outgoing).await
        };
        self.release_room_lock(chat_id, lock);

        let stored = result?;
        tracing::info!(
            chat_id = %chat_id,
            sender_id = %user_id,
            message_id = %stored.id,
            "Message sent"
        );
        Ok(stored)
    }

    async fn append_and_enqueue(
        &self,
        identity: &Identity,
        chat_id: &str,
        outgoing: OutgoingMessage,
    ) -> Result<Message, ChatError> {
        let user_id = identity.user_id();
        let stored = self
            .messages
            .append(NewMessage {
                chat_id: chat_id.to_string(),
                sender_id: user_id.to_string(),
                sender_name: identity.name.clone(),
                text: outgoing.text,
                id: outgoing.id,
                client_timestamp: outgoing.client_timestamp,
            })
            .await?;

        self.typing.clear_typing(chat_id, user_id);
        if self.events.send(RoomEvent::Message(stored.clone())).is_err() {
            tracing::warn!(chat_id = %chat_id, "Delivery task stopped; message stored without live push");
        }
        Ok(stored)
    }

    pub async fn set_typing(&self, user_id: &str, chat_id: &str) -> Result<(), ChatError> {
        self.rooms.require_participant(user_id, chat_id).await?;
        self.typing.set_typing(chat_id, user_id);
        Ok(())
    }

    pub async fn stop_typing(&self, user_id: &str, chat_id: &str) -> Result<(), ChatError> {
        self.rooms.require_participant(user_id, chat_id).await?;
        self.typing.clear_typing(chat_id, user_id);
        Ok(())
    }

    pub async fn subscribe(
        &self,
        user_id: &str,
        connection_id: Uuid,
        chat_id: &str,
    ) -> Result<Subscription, ChatError> {
        self.broadcaster
            .subscribe(user_id, connection_id, chat_id)
            .await
    }

    pub fn unsubscribe(&self, user_id: &str, subscription_id: Uuid) -> bool {
        self.broadcaster.unsubscribe(user_id, subscription_id)
    }

    /// Apply a collaboration change and tell the affected users that their
    /// room list changed.
    pub async fn collaboration_changed(
        &self,
        change: CollaborationChange,
    ) -> Result<Vec<String>, ChatError> {
        let affected = self.rooms.apply_change(change).await?;
        for user in &affected {
            self.broadcaster.publish_rooms_changed(user);
        }
        Ok(affected)
    }

    /// Clean up after a connection's actor stopped.
    pub fn connection_closed(&self, user_id: &str, connection_id: Uuid) {
        let dropped = self.broadcaster.drop_connection(connection_id);
        // A superseding connection keeps the user's typing state alive
        if !self.broadcaster.registry().is_online(user_id) {
            self.typing.clear_user(user_id);
        }
        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            subscriptions = dropped,
            "Connection state released"
        );
    }

    fn room_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(chat_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the room's lock entry unless another sender holds or waits on it.
    fn release_room_lock(&self, chat_id: &str, lock: Arc<Mutex<()>>) {
        // One reference in the map plus ours means nobody else has it
        self.room_locks.remove_if(chat_id, |_, held| {
            Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2
        });
    }
}
