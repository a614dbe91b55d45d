//! Message Store Adapter: validation, authorization and bounded retries in
//! front of the durable message store.

use chrono::Utc;
use futures_util::stream::{self, Stream, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::store::{Cursor, MessageStore, StoredMessageDraft};
use crate::chat::{Message, MessagePage, NewMessage};
use crate::config::ChatSettings;
use crate::error::{ChatError, StoreError};
use crate::rooms::RoomIndex;

/// Longest accepted client-supplied message id.
const MAX_ID_LENGTH: usize = 128;

#[derive(Clone)]
pub struct MessageAdapter {
    store: Arc<dyn MessageStore>,
    rooms: RoomIndex,
    retry_attempts: u32,
    retry_backoff: Duration,
    default_page_size: u32,
    max_page_size: u32,
    max_text_length: usize,
}

impl MessageAdapter {
    pub fn new(store: Arc<dyn MessageStore>, rooms: RoomIndex, settings: &ChatSettings) -> Self {
        Self {
            store,
            rooms,
            retry_attempts: settings.store_retry_attempts,
            retry_backoff: settings.store_retry_backoff,
            default_page_size: settings.default_page_size,
            max_page_size: settings.max_page_size,
            max_text_length: settings.max_text_length,
        }
    }

    /// Validate and persist a message.
    ///
    /// Fails with `RoomNotFound`/`UnauthorizedRoom` before touching the store,
    /// `InvalidMessage` for bad payloads and `StoreUnavailable` once retries
    /// are exhausted.
    pub async fn append(&self, message: NewMessage) -> Result<Message, ChatError> {
        self.rooms
            .require_participant(&message.sender_id, &message.chat_id)
            .await?;

        let text = message.text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidMessage("text is empty".to_string()));
        }
        if text.chars().count() > self.max_text_length {
            return Err(ChatError::InvalidMessage(format!(
                "text exceeds {} characters",
                self.max_text_length
            )));
        }

        let id = match message.id {
            Some(id) => {
                let id = id.trim().to_string();
                if id.is_empty() || id.len() > MAX_ID_LENGTH {
                    return Err(ChatError::InvalidMessage("malformed message id".to_string()));
                }
                id
            }
            None => Uuid::now_v7().to_string(),
        };

        let draft = StoredMessageDraft {
            id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            text: text.to_string(),
            received_at: Utc::now(),
            client_timestamp: message.client_timestamp,
        };

        let stored = self
            .with_retry("append", || self.store.insert(draft.clone()))
            .await?;

        tracing::debug!(
            chat_id = %stored.chat_id,
            message_id = %stored.id,
            cursor = %stored.cursor,
            "Message appended"
        );

        Ok(stored)
    }

    /// One page of messages after `cursor` in canonical order.
    /// Callers are responsible for the participation check.
    pub async fn list_since(
        &self,
        chat_id: &str,
        cursor: Option<Cursor>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ChatError> {
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);

        // One extra row tells us whether another page exists
        let mut messages = self
            .with_retry("page", || {
                self.store.page(chat_id, cursor, limit.saturating_add(1))
            })
            .await?;

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        let next_cursor = messages.last().map(|m| m.cursor).or(cursor);

        Ok(MessagePage {
            messages,
            next_cursor,
            has_more,
        })
    }

    /// Lazy, restartable history from `from` to the end of the room, fetched
    /// one page at a time as the stream is polled.
    pub fn history<'a>(
        &'a self,
        chat_id: &'a str,
        from: Option<Cursor>,
        page_size: u32,
    ) -> impl Stream<Item = Result<Message, ChatError>> + 'a {
        stream::try_unfold(Some(from), move |state| async move {
            let Some(cursor) = state else {
                return Ok::<_, ChatError>(None);
            };
            let page = self.list_since(chat_id, cursor, Some(page_size)).await?;
            let next = if page.has_more {
                Some(page.next_cursor)
            } else {
                None
            };
            let items = stream::iter(page.messages.into_iter().map(Ok::<_, ChatError>));
            Ok(Some((items, next)))
        })
        .try_flatten()
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, ChatError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut delay = self.retry_backoff;
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(StoreError::IdConflict(id)) => {
                    return Err(ChatError::InvalidMessage(format!(
                        "message id {} is already taken",
                        id
                    )));
                }
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        op = op,
                        attempt = attempt,
                        error = %e,
                        "Message store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(op = op, error = %e, "Message store unavailable");
                    return Err(ChatError::StoreUnavailable);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chat::SqliteMessageStore;
    use crate::rooms::{
        CollaborationChange, CollaborationRecord, CollaborationStatus, SqliteDirectory,
    };
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store double that fails the first `failures` calls.
    pub(crate) struct FlakyStore {
        pub inner: SqliteMessageStore,
        pub failures: AtomicU32,
        pub calls: AtomicU32,
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn insert(&self, draft: StoredMessageDraft) -> Result<Message, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("injected".to_string()));
            }
            self.inner.insert(draft).await
        }

        async fn page(
            &self,
            chat_id: &str,
            after: Option<Cursor>,
            limit: u32,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.page(chat_id, after, limit).await
        }
    }

    pub(crate) async fn room_index_with_ab() -> (RoomIndex, crate::db::DbPool) {
        let db = crate::db::init_in_memory().unwrap();
        let rooms = RoomIndex::new(Arc::new(SqliteDirectory::new(db.clone())));
        rooms
            .apply_change(CollaborationChange {
                collaboration: CollaborationRecord {
                    id: "c1".to_string(),
                    requester_id: "A".to_string(),
                    recipient_id: "B".to_string(),
                    status: CollaborationStatus::Accepted,
                    chat_id: Some("A-B".to_string()),
                },
                requester: None,
                recipient: None,
            })
            .await
            .unwrap();
        (rooms, db)
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            store_retry_backoff: Duration::from_millis(1),
            ..ChatSettings::default()
        }
    }

    fn new_message(sender: &str, text: &str) -> NewMessage {
        NewMessage {
            chat_id: "A-B".to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            text: text.to_string(),
            id: None,
            client_timestamp: None,
        }
    }

    async fn adapter() -> MessageAdapter {
        let (rooms, db) = room_index_with_ab().await;
        MessageAdapter::new(Arc::new(SqliteMessageStore::new(db)), rooms, &settings())
    }

    #[tokio::test]
    async fn appends_come_back_in_insertion_order() {
        let adapter = adapter().await;
        for i in 0..20 {
            let sender = if i % 2 == 0 { "A" } else { "B" };
            adapter
                .append(new_message(sender, &format!("msg {}", i)))
                .await
                .unwrap();
        }

        let page = adapter.list_since("A-B", None, Some(100)).await.unwrap();
        let texts: Vec<_> = page.messages.iter().map(|m| m.text.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("msg {}", i)).collect();
        assert_eq!(texts, expected);
        assert!(!page.has_more);

        for pair in page.messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
            assert!(pair[0].cursor < pair[1].cursor);
        }
    }

    #[tokio::test]
    async fn rejects_blank_text_and_outsiders() {
        let adapter = adapter().await;
        assert!(matches!(
            adapter.append(new_message("A", "   ")).await,
            Err(ChatError::InvalidMessage(_))
        ));
        assert_eq!(
            adapter.append(new_message("C", "hi")).await.unwrap_err(),
            ChatError::UnauthorizedRoom
        );

        let mut missing = new_message("A", "hi");
        missing.chat_id = "A-Z".to_string();
        assert!(matches!(
            adapter.append(missing).await,
            Err(ChatError::RoomNotFound(_))
        ));

        let page = adapter.list_since("A-B", None, None).await.unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn text_is_trimmed_and_length_bounded() {
        let adapter = adapter().await;
        let stored = adapter.append(new_message("A", "  hi there \n")).await.unwrap();
        assert_eq!(stored.text, "hi there");

        let long = "x".repeat(ChatSettings::default().max_text_length + 1);
        assert!(matches!(
            adapter.append(new_message("A", &long)).await,
            Err(ChatError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn client_id_is_kept_and_deduplicated() {
        let adapter = adapter().await;
        let mut msg = new_message("A", "Hello");
        msg.id = Some("1700000000000".to_string());

        let first = adapter.append(msg.clone()).await.unwrap();
        let second = adapter.append(msg).await.unwrap();
        assert_eq!(first.id, "1700000000000");
        assert_eq!(first, second);

        let mut spoof = new_message("B", "Hello");
        spoof.id = Some("1700000000000".to_string());
        assert!(matches!(
            adapter.append(spoof).await,
            Err(ChatError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let (rooms, db) = room_index_with_ab().await;
        let store = Arc::new(FlakyStore {
            inner: SqliteMessageStore::new(db),
            failures: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let adapter = MessageAdapter::new(store.clone(), rooms, &settings());

        adapter.append(new_message("A", "eventually")).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_store_failure_surfaces_unavailable() {
        let (rooms, db) = room_index_with_ab().await;
        let store = Arc::new(FlakyStore {
            inner: SqliteMessageStore::new(db),
            failures: AtomicU32::new(100),
            calls: AtomicU32::new(0),
        });
        let adapter = MessageAdapter::new(store.clone(), rooms, &settings());

        let err = adapter.append(new_message("A", "lost")).await.unwrap_err();
        assert_eq!(err, ChatError::StoreUnavailable);
        assert!(err.is_retryable());
        // initial call + configured retries
        assert_eq!(
            store.calls.load(Ordering::SeqCst),
            1 + settings().store_retry_attempts
        );
    }

    #[tokio::test]
    async fn unbounded_page_size_does_not_overflow() {
        let (rooms, db) = room_index_with_ab().await;
        let settings = ChatSettings {
            max_page_size: u32::MAX,
            ..settings()
        };
        let adapter = MessageAdapter::new(Arc::new(SqliteMessageStore::new(db)), rooms, &settings);
        adapter.append(new_message("A", "only")).await.unwrap();

        let page = adapter
            .list_since("A-B", None, Some(u32::MAX))
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn history_stream_walks_every_page() {
        let adapter = adapter().await;
        for i in 0..7 {
            adapter
                .append(new_message("A", &format!("m{}", i)))
                .await
                .unwrap();
        }

        let all: Vec<Message> = adapter
            .history("A-B", None, 3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 7);

        // Restart from the middle
        let rest: Vec<Message> = adapter
            .history("A-B", Some(all[3].cursor), 2)
            .try_collect()
            .await
            .unwrap();
        let texts: Vec<_> = rest.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m5", "m6"]);

        // Lazy: taking one item only needs the first page
        let first = adapter.history("A-B", None, 3).boxed().next().await;
        assert_eq!(first.unwrap().unwrap().text, "m0");
    }
}
