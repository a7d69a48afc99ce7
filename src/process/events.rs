use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One terminated process, for display only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedEvent {
    pub pid: u32,
    pub process_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded history of terminations, most recent first
pub struct RecentBlocks {
    capacity: usize,
    entries: Mutex<VecDeque<BlockedEvent>>,
}

impl RecentBlocks {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record an event, evicting the oldest once full
    pub fn push(&self, event: BlockedEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_front(event);
        entries.truncate(self.capacity);
    }

    /// Up to `limit` events, newest first
    pub fn recent(&self, limit: Option<usize>) -> Vec<BlockedEvent> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .take(limit.unwrap_or(self.capacity))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
