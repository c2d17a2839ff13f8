//! Bounded rolling event history
//!
//! Keeps the most recent N published events in memory for late joiners and
//! audits. Oldest entries are evicted first once the buffer is full; there
//! is no persistence across restarts.

use std::collections::VecDeque;

use crate::types::{Event, Interest};

/// Order-preserving ring buffer of recently published events
pub struct EventHistory {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventHistory {
    /// Create a history retaining the last `capacity` events.
    ///
    /// Capacity below 1 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest entry at capacity
    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` most recent events matching `filter`, in
    /// chronological order. `None` returns everything retained.
    pub fn query(&self, filter: Interest, limit: Option<usize>) -> Vec<Event> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut recent: Vec<Event> = self
            .events
            .iter()
            .rev()
            .filter(|event| filter.matches(event.kind))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Number of events currently retained
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been retained yet
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured retention bound
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
