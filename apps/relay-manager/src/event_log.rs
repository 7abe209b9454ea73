use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use relay_proto::{EventBody, SessionEvent};

use crate::metrics;

pub const MAX_EVENTS_PER_SESSION: usize = 500;
pub const DEFAULT_EVENT_LIMIT: usize = 200;

/// Bounded per-session event history. Once full, the oldest entry is
/// dropped for every append; indices keep counting from where they were.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<SessionEvent>,
    capacity: usize,
    next_index: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(MAX_EVENTS_PER_SESSION)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_index: 1,
        }
    }

    pub fn append(&mut self, body: EventBody, created_at: DateTime<Utc>) -> SessionEvent {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            metrics::EVENTS_TRIMMED.inc();
        }
        let event = SessionEvent {
            index: self.next_index,
            created_at,
            body,
        };
        self.next_index += 1;
        self.entries.push_back(event.clone());
        event
    }

    /// Most recent events, oldest first. `limit` is clamped to `1..=capacity`.
    pub fn recent(&self, limit: Option<usize>) -> Vec<SessionEvent> {
        let limit = limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, self.capacity);
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.back().map(|event| event.index)
    }
}
