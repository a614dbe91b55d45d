use moka::sync::Cache;
use std::fmt;

/// Default number of message ids remembered per connection.
pub const RECENT_IDS_CAPACITY: u64 = 512;

/// Bounded set of message ids recently pushed on one connection.
///
/// Live push is at-least-once; this drops a repeat of an id the connection
/// has already been sent. Clones share the same set.
#[derive(Clone)]
pub struct RecentIds {
    seen: Cache<String, ()>,
}

impl RecentIds {
    pub fn new(capacity: u64) -> Self {
        Self {
            seen: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Remember `id`. Returns false if it was already present.
    pub fn insert(&self, id: &str) -> bool {
        self.seen.entry(id.to_string()).or_insert(()).is_fresh()
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(RECENT_IDS_CAPACITY)
    }
}

impl fmt::Debug for RecentIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecentIds")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_rejected() {
        let recent = RecentIds::default();
        assert!(recent.insert("m1"));
        assert!(!recent.insert("m1"));
        assert!(recent.insert("m2"));

        // Clones see the same ids
        assert!(!recent.clone().insert("m2"));
    }

    #[test]
    fn memory_stays_bounded() {
        let recent = RecentIds::new(16);
        for i in 0..500 {
            recent.insert(&format!("m{}", i));
        }
        recent.seen.run_pending_tasks();
        assert!(recent.seen.entry_count() <= 16);
    }
}
