//! Delivery Broadcaster: best-effort live push of messages and typing edges
//! to subscribed, connected room participants.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chat::{Message, TypingEdge};
use crate::error::ChatError;
use crate::rooms::RoomIndex;
use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionRegistry};

/// A connection's interest in one room's live events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub chat_id: String,
    pub connection_id: Uuid,
}

/// Live events waiting on the delivery queue. Everything a room pushes
/// goes through the one queue so peers observe edges and messages in the
/// order they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Typing(TypingEdge),
    Message(Message),
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
    /// chat_id -> subscriptions
    subscriptions: Arc<DashMap<String, Vec<Subscription>>>,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry, rooms: RoomIndex) -> Self {
        Self {
            registry,
            rooms,
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Drain `events` in order until every sender is gone.
    pub fn spawn_delivery(
        &self,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
    ) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                broadcaster.deliver(event).await;
            }
        })
    }

    pub async fn deliver(&self, event: RoomEvent) -> usize {
        match event {
            RoomEvent::Typing(edge) => {
                self.publish_typing(&edge.chat_id, &edge.user_id, edge.is_typing)
                    .await
            }
            RoomEvent::Message(message) => {
                let delivered = self.publish_message(&message).await;
                tracing::debug!(
                    chat_id = %message.chat_id,
                    message_id = %message.id,
                    delivered = delivered,
                    "Live push"
                );
                delivered
            }
        }
    }

    /// Subscribe `connection_id` (owned by `user_id`) to `chat_id`.
    /// Non-participants get `UnauthorizedRoom` and nothing is recorded.
    /// Subscribing twice from the same connection returns the existing
    /// subscription.
    pub async fn subscribe(
        &self,
        user_id: &str,
        connection_id: Uuid,
        chat_id: &str,
    ) -> Result<Subscription, ChatError> {
        self.rooms.require_participant(user_id, chat_id).await?;

        let mut subs = self.subscriptions.entry(chat_id.to_string()).or_default();
        if let Some(existing) = subs
            .iter()
            .find(|s| s.user_id == user_id && s.connection_id == connection_id)
        {
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            connection_id,
        };
        subs.push(subscription.clone());

        tracing::debug!(
            user_id = %user_id,
            chat_id = %chat_id,
            connection_id = %connection_id,
            subscription_id = %subscription.id,
            "Subscribed to room"
        );
        Ok(subscription)
    }

    /// Remove a subscription owned by `user_id`. Returns whether it existed.
    pub fn unsubscribe(&self, user_id: &str, subscription_id: Uuid) -> bool {
        let mut removed = false;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|s| !(s.id == subscription_id && s.user_id == user_id));
            if entry.len() != before {
                removed = true;
                break;
            }
        }
        self.subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Drop every subscription bound to `connection_id`.
    pub fn drop_connection(&self, connection_id: Uuid) -> usize {
        let mut removed = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.connection_id != connection_id);
            removed += before - entry.len();
        }
        self.subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Subscriptions currently held for `chat_id`.
    pub fn subscriptions_for(&self, chat_id: &str) -> Vec<Subscription> {
        self.subscriptions
            .get(chat_id)
            .map(|subs| subs.value().clone())
            .unwrap_or_default()
    }

    /// Push `message` to each participant that has a live, subscribed
    /// connection. Returns the number of connections it was queued on;
    /// offline participants are not an error.
    pub async fn publish_message(&self, message: &Message) -> usize {
        let room = match self.rooms.resolve(&message.chat_id).await {
            Ok(room) => room,
            Err(e) => {
                tracing::warn!(
                    chat_id = %message.chat_id,
                    error = %e,
                    "Skipping live push for unresolvable room"
                );
                return 0;
            }
        };

        room.participants()
            .into_iter()
            .filter_map(|user| self.live_subscriber(&message.chat_id, user))
            .filter(|handle| handle.push_message(message))
            .count()
    }

    /// Push a typing edge to the other participant of the room.
    pub async fn publish_typing(&self, chat_id: &str, user_id: &str, is_typing: bool) -> usize {
        let room = match self.rooms.resolve(chat_id).await {
            Ok(room) => room,
            Err(_) => return 0,
        };
        let other = room.other_participant(user_id);

        let Some(handle) = self.live_subscriber(chat_id, other) else {
            return 0;
        };
        let event = if is_typing {
            ServerEvent::Typing {
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
            }
        } else {
            ServerEvent::StopTyping {
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
            }
        };
        usize::from(handle.send(event))
    }

    /// Tell `user_id` their room list changed. Not gated on subscriptions.
    pub fn publish_rooms_changed(&self, user_id: &str) -> bool {
        match self.registry.get_handle(user_id) {
            Some(handle) => handle.send(ServerEvent::RoomsChanged {
                user_id: user_id.to_string(),
            }),
            None => false,
        }
    }

    /// The registered connection of `user_id` if it is subscribed to
    /// `chat_id`. Subscriptions left behind by an older connection of the
    /// same user are pruned on the way.
    fn live_subscriber(&self, chat_id: &str, user_id: &str) -> Option<ConnectionHandle> {
        let handle = self.registry.get_handle(user_id);
        let current = handle.as_ref().map(|h| h.id);

        let mut subs = self.subscriptions.get_mut(chat_id)?;
        subs.retain(|s| s.user_id != user_id || Some(s.connection_id) == current);
        let subscribed = subs.iter().any(|s| s.user_id == user_id);
        drop(subs);

        handle.filter(|_| subscribed)
    }
}
