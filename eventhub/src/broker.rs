//! Event broker for telemetry fan-out
//!
//! Pub/sub hub with bounded per-subscriber queues. Publishing never blocks
//! on a slow consumer: a delivery that cannot be enqueued is dropped and the
//! offending subscriber is evicted from every interest it joined, so one
//! stuck consumer cannot stall the event pipeline for the rest.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::history::EventHistory;
use crate::types::{Event, EventPayload, Interest};

/// Default capacity of the rolling event history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Unique identifier for subscriber queues
pub type SubscriberId = u64;

/// Shared reference to an EventBroker
pub type SharedEventBroker = Arc<EventBroker>;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one bounded subscriber queue.
///
/// Created with [`EventQueue::bounded`]; the caller keeps the receiver side
/// and registers this handle with the broker. The id stays stable across
/// registrations, which is what lets [`EventBroker::unsubscribe_all`] find
/// every interest the queue joined.
#[derive(Debug, Clone)]
pub struct EventQueue {
    id: SubscriberId,
    tx: mpsc::Sender<Event>,
}

impl EventQueue {
    /// Allocate a bounded queue; capacity below 1 is clamped to 1
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    /// Stable identity of this queue
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

struct BrokerInner {
    /// Interest -> registered queues, keyed by subscriber id
    subscribers: HashMap<Interest, HashMap<SubscriberId, mpsc::Sender<Event>>>,
    history: EventHistory,
    total_events: u64,
    events_by_kind: HashMap<&'static str, u64>,
}

/// Central fan-out hub decoupling publishers from consumers.
///
/// One broker per logical system, constructed explicitly and passed to
/// producers and consumers; there is no module-level singleton. All state
/// is in-memory and dies with the broker.
pub struct EventBroker {
    inner: Mutex<BrokerInner>,
}

impl EventBroker {
    /// Create a broker with the default history capacity
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a broker retaining the last `capacity` events
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BrokerInner {
                subscribers: HashMap::new(),
                history: EventHistory::new(capacity),
                total_events: 0,
                events_by_kind: HashMap::new(),
            }),
        }
    }

    /// Create a shared reference to this broker
    pub fn shared(self) -> SharedEventBroker {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event to every queue registered for its kind or the
    /// wildcard.
    ///
    /// Never blocks and never fails on behalf of a subscriber: a queue that
    /// is full or closed has this one delivery dropped and is then removed
    /// from all of its interests. Hot-path callers can treat this as
    /// fire-and-forget. A queue registered under both the event's kind and
    /// the wildcard receives a single copy.
    pub fn publish(&self, event: Event) {
        let mut inner = self.lock();

        inner.history.push(event.clone());
        inner.total_events += 1;
        *inner.events_by_kind.entry(event.kind.as_str()).or_insert(0) += 1;

        let mut delivered = 0usize;
        let mut attempted: HashSet<SubscriberId> = HashSet::new();
        let mut failed: Vec<SubscriberId> = Vec::new();

        for interest in [Interest::Kind(event.kind), Interest::All] {
            let Some(queues) = inner.subscribers.get(&interest) else {
                continue;
            };
            for (&id, tx) in queues {
                if !attempted.insert(id) {
                    continue;
                }
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            subscriber = id,
                            kind = %event.kind,
                            "subscriber queue full, dropping delivery and evicting"
                        );
                        failed.push(id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(subscriber = id, kind = %event.kind, "subscriber queue closed, evicting");
                        failed.push(id);
                    }
                }
            }
        }

        // A queue that failed once is assumed dead: remove it everywhere so
        // later publishes stop paying for it.
        if !failed.is_empty() {
            for queues in inner.subscribers.values_mut() {
                for id in &failed {
                    queues.remove(id);
                }
            }
            inner.subscribers.retain(|_, queues| !queues.is_empty());
        }

        debug!(
            kind = %event.kind,
            priority = event.priority,
            delivered,
            evicted = failed.len(),
            "event published"
        );
    }

    /// Build and publish the event for a typed payload
    pub fn emit<P: EventPayload>(&self, payload: &P) {
        self.publish(Event::from_payload(payload));
    }

    /// Register a queue for one interest. Idempotent: registering the same
    /// queue twice for the same interest is a no-op.
    pub fn subscribe(&self, queue: &EventQueue, interest: Interest) {
        let mut inner = self.lock();
        inner
            .subscribers
            .entry(interest)
            .or_default()
            .insert(queue.id, queue.tx.clone());
        debug!(subscriber = queue.id, %interest, "subscribed");
    }

    /// Register a queue for a string interest key arriving from a
    /// transport.
    ///
    /// Returns false, with no side effect, when the key names neither a
    /// known event kind nor the wildcard.
    pub fn subscribe_key(&self, queue: &EventQueue, key: &str) -> bool {
        match key.parse::<Interest>() {
            Ok(interest) => {
                self.subscribe(queue, interest);
                true
            }
            Err(err) => {
                warn!(subscriber = queue.id, %err, "rejected subscription");
                false
            }
        }
    }

    /// Remove a queue from one interest; absent registrations are a no-op
    pub fn unsubscribe(&self, queue: &EventQueue, interest: Interest) {
        let mut inner = self.lock();
        if let Some(queues) = inner.subscribers.get_mut(&interest) {
            queues.remove(&queue.id);
            if queues.is_empty() {
                inner.subscribers.remove(&interest);
            }
        }
        debug!(subscriber = queue.id, %interest, "unsubscribed");
    }

    /// String-key variant of [`unsubscribe`](Self::unsubscribe); false for
    /// an unknown key
    pub fn unsubscribe_key(&self, queue: &EventQueue, key: &str) -> bool {
        match key.parse::<Interest>() {
            Ok(interest) => {
                self.unsubscribe(queue, interest);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove a queue from every interest it joined, in one step.
    ///
    /// Used on consumer teardown so no registration dangles regardless of
    /// which interests were joined.
    pub fn unsubscribe_all(&self, queue: &EventQueue) {
        let mut inner = self.lock();
        for queues in inner.subscribers.values_mut() {
            queues.remove(&queue.id);
        }
        inner.subscribers.retain(|_, queues| !queues.is_empty());
        debug!(subscriber = queue.id, "unsubscribed from all interests");
    }

    /// Up to `limit` most recent events, optionally narrowed to one kind
    /// (`Interest::All` returns across all kinds), in chronological order
    pub fn get_history(&self, filter: Interest, limit: Option<usize>) -> Vec<Event> {
        self.lock().history.query(filter, limit)
    }

    /// Aggregate counters for observability
    pub fn get_stats(&self) -> BrokerStats {
        let inner = self.lock();
        let subscriptions_by_interest: HashMap<String, usize> = inner
            .subscribers
            .iter()
            .map(|(interest, queues)| (interest.to_string(), queues.len()))
            .collect();
        // Sum of registrations: a queue under two interests counts twice.
        let active_subscriptions: usize = subscriptions_by_interest.values().sum();

        BrokerStats {
            total_events: inner.total_events,
            events_by_kind: inner
                .events_by_kind
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            history_size: inner.history.len(),
            history_capacity: inner.history.capacity(),
            subscriptions_by_interest,
            active_subscriptions,
        }
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate broker counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct BrokerStats {
    /// Events published since the broker was created
    pub total_events: u64,
    /// Publish count per event kind
    pub events_by_kind: HashMap<String, u64>,
    /// Events currently retained in history
    pub history_size: usize,
    /// Configured history bound
    pub history_capacity: usize,
    /// Registration count per interest key
    pub subscriptions_by_interest: HashMap<String, usize>,
    /// Sum of registrations across all interests
    pub active_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::payload::ToolExecuted;
    use crate::types::{EventData, EventKind};

    fn event(kind: EventKind) -> Event {
        Event::new(kind, EventData::new())
    }

    #[tokio::test]
    async fn test_publish_delivers_in_fifo_order() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(16);
        broker.subscribe(&queue, Interest::All);

        let events: Vec<Event> = (0..8).map(|_| event(EventKind::ToolExecuted)).collect();
        for e in &events {
            broker.publish(e.clone());
        }

        for expected in &events {
            let got = rx.try_recv().unwrap();
            assert_eq!(got.id, expected.id);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concrete_interest_receives_only_its_kind() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(16);
        broker.subscribe(&queue, Interest::Kind(EventKind::NodeRegistered));

        let e1 = event(EventKind::NodeRegistered);
        broker.publish(e1.clone());
        broker.publish(event(EventKind::ToolExecuted));

        assert_eq!(rx.try_recv().unwrap().id, e1.id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_kind_plus_wildcard_receives_one_copy() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(16);
        broker.subscribe(&queue, Interest::All);
        broker.subscribe(&queue, Interest::Kind(EventKind::SystemAlert));

        broker.publish(event(EventKind::SystemAlert));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(16);
        broker.subscribe(&queue, Interest::All);
        broker.subscribe(&queue, Interest::All);

        assert_eq!(broker.get_stats().active_subscriptions, 1);

        broker.publish(event(EventKind::NodeHeartbeat));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_is_dropped_and_evicted() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(1);
        broker.subscribe(&queue, Interest::All);

        let e1 = event(EventKind::NodeHeartbeat);
        broker.publish(e1.clone());
        broker.publish(event(EventKind::NodeHeartbeat));

        assert_eq!(broker.get_stats().active_subscriptions, 0);

        // A later publish must not reach the evicted queue.
        broker.publish(event(EventKind::NodeHeartbeat));
        assert_eq!(rx.try_recv().unwrap().id, e1.id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_eviction_spans_every_interest() {
        let broker = EventBroker::new();
        let (queue, _rx) = EventQueue::bounded(1);
        broker.subscribe(&queue, Interest::All);
        broker.subscribe(&queue, Interest::Kind(EventKind::ToolExecuted));
        broker.subscribe(&queue, Interest::Kind(EventKind::SystemAlert));

        broker.publish(event(EventKind::NodeHeartbeat));
        broker.publish(event(EventKind::NodeHeartbeat));

        assert_eq!(broker.get_stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_is_evicted() {
        let broker = EventBroker::new();
        let (queue, rx) = EventQueue::bounded(4);
        broker.subscribe(&queue, Interest::All);
        drop(rx);

        broker.publish(event(EventKind::SystemAlert));
        assert_eq!(broker.get_stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_subscribe_key_rejects_unknown_interest() {
        let broker = EventBroker::new();
        let (queue, _rx) = EventQueue::bounded(4);

        assert!(broker.subscribe_key(&queue, "all"));
        assert!(broker.subscribe_key(&queue, "node_registered"));
        assert!(!broker.subscribe_key(&queue, "quantum_flux"));

        assert_eq!(broker.get_stats().active_subscriptions, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_absent_is_noop() {
        let broker = EventBroker::new();
        let (queue, _rx) = EventQueue::bounded(4);
        broker.unsubscribe(&queue, Interest::All);
        assert_eq!(broker.get_stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_emit_builds_payload_shape() {
        let broker = EventBroker::new();
        let (queue, mut rx) = EventQueue::bounded(4);
        broker.subscribe(&queue, Interest::Kind(EventKind::ToolExecuted));

        broker.emit(&ToolExecuted {
            tool: "clippy".to_string(),
            success: true,
            duration_ms: 950,
        });

        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, EventKind::ToolExecuted);
        assert_eq!(got.data["tool"], "clippy");
        assert_eq!(got.data["duration_ms"], 950);
    }
}
