//! Duplicate delivery suppression.
//!
//! The platform retries webhook deliveries, sometimes in parallel. Each message id is
//! remembered for a fixed window; expired ids are swept on every lookup, not by a timer.
//! Entries live in memory only, so a restart reopens the window.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Result of a dedup lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    /// First delivery within the window; the id is now recorded.
    New,
    /// Already recorded within the window.
    Duplicate,
}

/// message id -> first-seen time, guarded by one mutex so purge + check + insert is atomic.
pub struct DedupGate {
    window: chrono::Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Purge expired ids, then report whether `message_id` was seen; records it when new.
    /// A duplicate hit does not refresh the first-seen time.
    pub fn seen_or_record(&self, message_id: &str, now: DateTime<Utc>) -> Seen {
        let mut entries = self.entries.lock();
        let window = self.window;
        entries.retain(|_, first_seen| now.signed_duration_since(*first_seen) < window);
        if entries.contains_key(message_id) {
            return Seen::Duplicate;
        }
        entries.insert(message_id.to_string(), now);
        Seen::New
    }

    /// Number of ids currently tracked (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
