use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// In-memory, TTL-bounded set of video ids that should not be attempted while
/// no credential is usable. Never persisted.
///
/// Size is capped; when full, the oldest insertion is evicted first.
#[derive(Debug)]
pub struct AuthSkipCache {
    ttl: Duration,
    max_entries: usize,
    entries: IndexMap<String, Instant>,
}

impl AuthSkipCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: IndexMap::new(),
        }
    }

    /// True if `video_id` was marked and its entry has not expired. Expired
    /// entries are dropped on lookup.
    pub fn is_skipped(&mut self, video_id: &str, now: Instant) -> bool {
        if video_id.is_empty() {
            return false;
        }
        match self.entries.get(video_id) {
            None => false,
            Some(expires_at) if *expires_at <= now => {
                self.entries.shift_remove(video_id);
                false
            }
            Some(_) => true,
        }
    }

    pub fn mark(&mut self, video_id: &str, now: Instant) {
        if video_id.is_empty() {
            return;
        }
        // Re-marking moves the entry to the back of the eviction order.
        self.entries.shift_remove(video_id);
        if self.entries.len() >= self.max_entries {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(video_id.to_string(), now + self.ttl);
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.entries.contains_key(video_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
