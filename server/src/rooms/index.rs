use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ChatError, StoreError};
use crate::rooms::{ChatRoom, CollaborationChange, CollaborationSource, RoomSummary, UserProfile};

/// Read-mostly membership index over accepted collaborations.
///
/// Room lists are cached per user and rooms per chat id. A change
/// notification invalidates the entries of both participants, so the next
/// lookup goes back to the collaboration source.
///
/// Every change bumps `generation` before invalidating. A lookup only fills
/// the cache if no change landed while it was reading the source, so a read
/// that raced a rejection can never put the closed room back.
#[derive(Clone)]
pub struct RoomIndex {
    source: Arc<dyn CollaborationSource>,
    /// user_id -> accepted rooms the user participates in
    user_rooms: Arc<DashMap<String, Arc<Vec<ChatRoom>>>>,
    /// chat_id -> room (accepted rooms only)
    rooms: Arc<DashMap<String, ChatRoom>>,
    generation: Arc<AtomicU64>,
}

fn unavailable(context: &str, err: StoreError) -> ChatError {
    tracing::warn!(error = %err, "Collaboration source failed during {}", context);
    ChatError::StoreUnavailable
}

impl RoomIndex {
    pub fn new(source: Arc<dyn CollaborationSource>) -> Self {
        Self {
            source,
            user_rooms: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// All accepted rooms where `user_id` is requester or recipient.
    pub async fn list_rooms_for_user(&self, user_id: &str) -> Result<Arc<Vec<ChatRoom>>, ChatError> {
        if let Some(cached) = self.user_rooms.get(user_id) {
            return Ok(cached.value().clone());
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let collaborations = self
            .source
            .accepted_for_user(user_id)
            .await
            .map_err(|e| unavailable("listRooms", e))?;

        let rooms: Vec<ChatRoom> = collaborations
            .iter()
            .filter(|c| c.involves(user_id))
            .filter_map(|c| c.room())
            .collect();

        for room in &rooms {
            self.cache_room(room, seen);
        }

        let rooms = Arc::new(rooms);
        if let Entry::Vacant(vacant) = self.user_rooms.entry(user_id.to_string()) {
            if self.is_current(seen) {
                vacant.insert(rooms.clone());
            }
        }
        Ok(rooms)
    }

    /// Rooms decorated with the other participant's profile, for the chat list.
    pub async fn room_summaries(&self, user_id: &str) -> Result<Vec<RoomSummary>, ChatError> {
        let rooms = self.list_rooms_for_user(user_id).await?;
        let mut summaries = Vec::with_capacity(rooms.len());

        for room in rooms.iter() {
            let other_id = room.other_participant(user_id);
            let other = self
                .source
                .profile(other_id)
                .await
                .map_err(|e| unavailable("profile lookup", e))?
                .unwrap_or_else(|| UserProfile::unknown(other_id));
            summaries.push(RoomSummary {
                chat_id: room.chat_id.clone(),
                collaboration_id: room.collaboration_id.clone(),
                other_participant: other,
            });
        }

        Ok(summaries)
    }

    /// Room behind `chat_id`, or `RoomNotFound` if no accepted collaboration
    /// backs it.
    pub async fn resolve(&self, chat_id: &str) -> Result<ChatRoom, ChatError> {
        if let Some(room) = self.rooms.get(chat_id) {
            return Ok(room.value().clone());
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let collaboration = self
            .source
            .find_by_chat_id(chat_id)
            .await
            .map_err(|e| unavailable("room lookup", e))?;

        match collaboration.and_then(|c| c.room()) {
            Some(room) => {
                self.cache_room(&room, seen);
                Ok(room)
            }
            None => Err(ChatError::RoomNotFound(chat_id.to_string())),
        }
    }

    /// True only if `user_id` is one of the two participants of `chat_id`.
    pub async fn authorize(&self, user_id: &str, chat_id: &str) -> bool {
        match self.resolve(chat_id).await {
            Ok(room) => room.has_participant(user_id),
            Err(_) => false,
        }
    }

    /// Resolve the room and check participation in one step.
    pub async fn require_participant(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> Result<ChatRoom, ChatError> {
        let room = self.resolve(chat_id).await?;
        if room.has_participant(user_id) {
            Ok(room)
        } else {
            tracing::debug!(user_id = %user_id, chat_id = %chat_id, "Room access denied");
            Err(ChatError::UnauthorizedRoom)
        }
    }

    /// Apply a collaboration change notification and invalidate affected
    /// cache entries. Returns the users whose room list changed.
    pub async fn apply_change(&self, change: CollaborationChange) -> Result<Vec<String>, ChatError> {
        let collaboration = self
            .source
            .apply(change)
            .await
            .map_err(|e| unavailable("collaboration update", e))?;

        // Lookups that started before this point must not fill the cache
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut affected = vec![
            collaboration.requester_id.clone(),
            collaboration.recipient_id.clone(),
        ];

        // Participants of a previously cached room under the same chat id
        if let Some((_, previous)) = self.rooms.remove(&collaboration.chat_id) {
            for user in previous.participants() {
                if !affected.iter().any(|u| u == user) {
                    affected.push(user.to_string());
                }
            }
        }

        for user in &affected {
            self.invalidate_user(user);
        }

        tracing::info!(
            collaboration_id = %collaboration.id,
            chat_id = %collaboration.chat_id,
            status = collaboration.status.as_str(),
            "Collaboration change applied"
        );

        Ok(affected)
    }

    pub fn invalidate_user(&self, user_id: &str) {
        self.user_rooms.remove(user_id);
    }

    fn is_current(&self, seen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == seen
    }

    /// Insert under the entry lock: an invalidation either bumped the
    /// generation first, or removes this entry after we release it.
    fn cache_room(&self, room: &ChatRoom, seen: u64) {
        if let Entry::Vacant(vacant) = self.rooms.entry(room.chat_id.clone()) {
            if self.is_current(seen) {
                vacant.insert(room.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{Collaboration, CollaborationRecord, CollaborationStatus, SqliteDirectory};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Reads the mirror, then sits on the answer before returning it.
    struct SlowLookup {
        inner: SqliteDirectory,
        delay: Duration,
    }

    #[async_trait]
    impl CollaborationSource for SlowLookup {
        async fn accepted_for_user(&self, user_id: &str) -> Result<Vec<Collaboration>, StoreError> {
            let found = self.inner.accepted_for_user(user_id).await?;
            tokio::time::sleep(self.delay).await;
            Ok(found)
        }

        async fn find_by_chat_id(&self, chat_id: &str) -> Result<Option<Collaboration>, StoreError> {
            let found = self.inner.find_by_chat_id(chat_id).await?;
            tokio::time::sleep(self.delay).await;
            Ok(found)
        }

        async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
            self.inner.profile(user_id).await
        }

        async fn apply(&self, change: CollaborationChange) -> Result<Collaboration, StoreError> {
            self.inner.apply(change).await
        }
    }

    fn slow_index() -> RoomIndex {
        let db = crate::db::init_in_memory().unwrap();
        RoomIndex::new(Arc::new(SlowLookup {
            inner: SqliteDirectory::new(db),
            delay: Duration::from_millis(100),
        }))
    }

    fn accepted(id: &str, a: &str, b: &str) -> CollaborationChange {
        with_status(id, a, b, CollaborationStatus::Accepted)
    }

    fn with_status(id: &str, a: &str, b: &str, status: CollaborationStatus) -> CollaborationChange {
        CollaborationChange {
            collaboration: CollaborationRecord {
                id: id.to_string(),
                requester_id: a.to_string(),
                recipient_id: b.to_string(),
                status,
                chat_id: None,
            },
            requester: None,
            recipient: Some(UserProfile {
                id: b.to_string(),
                name: "Bea".to_string(),
                role: "entrepreneur".to_string(),
                avatar: Some("https://example.test/bea.png".to_string()),
            }),
        }
    }

    fn index() -> RoomIndex {
        let db = crate::db::init_in_memory().unwrap();
        RoomIndex::new(Arc::new(SqliteDirectory::new(db)))
    }

    #[tokio::test]
    async fn authorize_only_participants() {
        let index = index();
        index.apply_change(accepted("c1", "A", "B")).await.unwrap();

        assert!(index.authorize("A", "A-B").await);
        assert!(index.authorize("B", "A-B").await);
        assert!(!index.authorize("C", "A-B").await);
        assert!(!index.authorize("A", "missing").await);

        assert_eq!(
            index.require_participant("C", "A-B").await.unwrap_err(),
            ChatError::UnauthorizedRoom
        );
        assert_eq!(
            index.require_participant("A", "missing").await.unwrap_err(),
            ChatError::RoomNotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn pending_collaboration_has_no_room() {
        let index = index();
        index
            .apply_change(with_status("c1", "A", "B", CollaborationStatus::Pending))
            .await
            .unwrap();
        assert!(index.list_rooms_for_user("A").await.unwrap().is_empty());
        assert!(matches!(
            index.resolve("A-B").await,
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn change_notification_invalidates_cached_lists() {
        let index = index();
        assert!(index.list_rooms_for_user("A").await.unwrap().is_empty());

        let affected = index.apply_change(accepted("c1", "A", "B")).await.unwrap();
        assert_eq!(affected, vec!["A".to_string(), "B".to_string()]);

        let rooms = index.list_rooms_for_user("A").await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].chat_id, "A-B");
    }

    #[tokio::test]
    async fn rejection_closes_a_cached_room() {
        let index = index();
        index.apply_change(accepted("c1", "A", "B")).await.unwrap();
        assert!(index.authorize("A", "A-B").await);

        index
            .apply_change(with_status("c1", "A", "B", CollaborationStatus::Rejected))
            .await
            .unwrap();
        assert!(!index.authorize("A", "A-B").await);
    }

    #[tokio::test]
    async fn summaries_show_other_participant() {
        let index = index();
        index.apply_change(accepted("c1", "A", "B")).await.unwrap();

        let for_a = index.room_summaries("A").await.unwrap();
        assert_eq!(for_a[0].other_participant.name, "Bea");

        // No profile mirrored for A yet
        let for_b = index.room_summaries("B").await.unwrap();
        assert_eq!(for_b[0].other_participant.id, "A");
        assert_eq!(for_b[0].other_participant.name, "Unknown");
    }

    #[tokio::test]
    async fn rejection_during_room_lookup_is_not_undone() {
        let index = slow_index();
        index.apply_change(accepted("c1", "A", "B")).await.unwrap();

        let in_flight = {
            let index = index.clone();
            tokio::spawn(async move { index.authorize("A", "A-B").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        index
            .apply_change(with_status("c1", "A", "B", CollaborationStatus::Rejected))
            .await
            .unwrap();

        // The read that started before the rejection still answers with
        // what it saw, but must not have cached it
        assert!(in_flight.await.unwrap());
        assert!(!index.authorize("A", "A-B").await);
        assert!(!index.authorize("B", "A-B").await);
    }

    #[tokio::test]
    async fn rejection_during_room_list_is_not_undone() {
        let index = slow_index();
        index.apply_change(accepted("c1", "A", "B")).await.unwrap();

        let in_flight = {
            let index = index.clone();
            tokio::spawn(async move { index.list_rooms_for_user("A").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        index
            .apply_change(with_status("c1", "A", "B", CollaborationStatus::Rejected))
            .await
            .unwrap();

        assert_eq!(in_flight.await.unwrap().unwrap().len(), 1);
        assert!(index.list_rooms_for_user("A").await.unwrap().is_empty());
        assert!(!index.authorize("A", "A-B").await);
    }
}
