//! Ephemeral per-room typing state with quiet-interval expiry.
//!
//! Only transitions are reported: the first signal for a (chat, user) pair
//! emits a start edge, renewals just push the expiry out, and expiry or an
//! explicit clear emits the stop edge. Edges are queued while the entry is
//! locked, so the queue order always matches the order of state changes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chat::RoomEvent;

/// A typing transition for one user in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEdge {
    pub chat_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

struct TypingEntry {
    /// Distinguishes this entry from a later one for the same key, so a
    /// stale timer never removes a renewed indicator.
    generation: u64,
    timer: JoinHandle<()>,
}

type TypingKey = (String, String);

#[derive(Clone)]
pub struct TypingCoordinator {
    quiet: Duration,
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    next_generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl TypingCoordinator {
    /// Coordinator queuing its edges on `events`.
    pub fn new(quiet: Duration, events: mpsc::UnboundedSender<RoomEvent>) -> Self {
        Self {
            quiet,
            entries: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
            events,
        }
    }

    /// Mark `user_id` as typing in `chat_id` and (re)start its quiet timer.
    /// Returns true when this was a false -> true transition.
    pub fn set_typing(&self, chat_id: &str, user_id: &str) -> bool {
        let key = (chat_id.to_string(), user_id.to_string());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // The timer is spawned under the entry lock so it can never observe
        // the map before this entry is in place.
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.timer.abort();
                entry.timer = self.spawn_expiry(key, generation);
                entry.generation = generation;
                false
            }
            Entry::Vacant(vacant) => {
                let timer = self.spawn_expiry(key, generation);
                let _entry = vacant.insert(TypingEntry { generation, timer });
                emit(&self.events, chat_id, user_id, true);
                true
            }
        }
    }

    /// Clear the indicator and emit a stop edge if it was set.
    pub fn clear_typing(&self, chat_id: &str, user_id: &str) -> bool {
        match self
            .entries
            .entry((chat_id.to_string(), user_id.to_string()))
        {
            Entry::Occupied(occupied) => {
                occupied.get().timer.abort();
                emit(&self.events, chat_id, user_id, false);
                occupied.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Clear every indicator held by `user_id`, emitting stop edges.
    pub fn clear_user(&self, user_id: &str) -> usize {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .filter(|e| e.key().1 == user_id)
            .map(|e| e.key().clone())
            .collect();

        keys.iter()
            .filter(|(chat_id, user_id)| self.clear_typing(chat_id, user_id))
            .count()
    }

    /// Users currently typing in `chat_id`.
    #[cfg(test)]
    pub(crate) fn current_typers(&self, chat_id: &str) -> std::collections::BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == chat_id)
            .map(|e| e.key().1.clone())
            .collect()
    }

    fn spawn_expiry(&self, key: TypingKey, generation: u64) -> JoinHandle<()> {
        let quiet = self.quiet;
        let entries = self.entries.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            if let Entry::Occupied(occupied) = entries.entry(key) {
                if occupied.get().generation == generation {
                    let (chat_id, user_id) = occupied.key();
                    tracing::debug!(chat_id = %chat_id, user_id = %user_id, "Typing indicator expired");
                    emit(&events, chat_id, user_id, false);
                    occupied.remove();
                }
            }
        })
    }
}

fn emit(events: &mpsc::UnboundedSender<RoomEvent>, chat_id: &str, user_id: &str, is_typing: bool) {
    tracing::debug!(
        chat_id = %chat_id,
        user_id = %user_id,
        is_typing = is_typing,
        "Typing edge"
    );
    let _ = events.send(RoomEvent::Typing(TypingEdge {
        chat_id: chat_id.to_string(),
        user_id: user_id.to_string(),
        is_typing,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(2);

    fn coordinator() -> (TypingCoordinator, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TypingCoordinator::new(QUIET, tx), rx)
    }

    fn edge(is_typing: bool) -> RoomEvent {
        RoomEvent::Typing(TypingEdge {
            chat_id: "A-B".to_string(),
            user_id: "A".to_string(),
            is_typing,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn auto_clears_after_quiet_interval() {
        let (typing, mut rx) = coordinator();
        assert!(typing.set_typing("A-B", "A"));
        assert_eq!(rx.recv().await, Some(edge(true)));
        assert!(typing.current_typers("A-B").contains("A"));

        tokio::time::sleep(QUIET + Duration::from_millis(10)).await;
        assert_eq!(rx.recv().await, Some(edge(false)));
        assert!(typing.current_typers("A-B").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn renewals_collapse_into_one_edge() {
        let (typing, mut rx) = coordinator();
        assert!(typing.set_typing("A-B", "A"));
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(!typing.set_typing("A-B", "A"));
        }

        // 2.5s after the first signal, still typing thanks to renewals
        assert!(typing.current_typers("A-B").contains("A"));
        assert_eq!(rx.recv().await, Some(edge(true)));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(QUIET + Duration::from_millis(10)).await;
        assert_eq!(rx.recv().await, Some(edge(false)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_clear_cancels_timer() {
        let (typing, mut rx) = coordinator();
        typing.set_typing("A-B", "A");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(typing.clear_typing("A-B", "A"));
        assert!(!typing.clear_typing("A-B", "A"));
        assert_eq!(rx.recv().await, Some(edge(true)));
        assert_eq!(rx.recv().await, Some(edge(false)));

        // The aborted timer must not emit a second stop
        tokio::time::sleep(QUIET * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_clear_keeps_edge_order() {
        let (typing, mut rx) = coordinator();
        typing.set_typing("A-B", "A");
        typing.clear_typing("A-B", "A");
        typing.set_typing("A-B", "A");

        assert_eq!(rx.recv().await, Some(edge(true)));
        assert_eq!(rx.recv().await, Some(edge(false)));
        assert_eq!(rx.recv().await, Some(edge(true)));
        assert!(typing.current_typers("A-B").contains("A"));

        tokio::time::sleep(QUIET + Duration::from_millis(10)).await;
        assert_eq!(rx.recv().await, Some(edge(false)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_user_covers_all_rooms() {
        let (typing, _rx) = coordinator();
        typing.set_typing("A-B", "A");
        typing.set_typing("A-C", "A");
        typing.set_typing("A-B", "B");

        assert_eq!(typing.clear_user("A"), 2);
        assert_eq!(
            typing.current_typers("A-B").into_iter().collect::<Vec<_>>(),
            vec!["B".to_string()]
        );
        assert!(typing.current_typers("A-C").is_empty());
    }
}
