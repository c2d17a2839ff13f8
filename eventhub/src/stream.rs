//! Per-consumer event stream
//!
//! Bridges one external consumer (typically a transport connection) to the
//! broker: owns a bounded queue, subscribes it to interests, and drains it
//! to a sink until the consumer detaches or the sink fails.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──subscribe──▶ Subscribed ──run──▶ Running ──▶ Stopping ──▶ Stopped
//! ```
//!
//! The transition into Stopped unsubscribes the stream's queue from every
//! interest exactly once; a stream dropped without ever running does the
//! same from `Drop`, so the broker never keeps a reference to a dead queue.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::broker::{EventQueue, SharedEventBroker, SubscriberId};
use crate::types::{Event, Interest};

/// Destination for events drained from a stream's queue.
///
/// Implementations serialize and transmit in whatever envelope their
/// transport uses; a returned error stops the owning stream without
/// redelivery.
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event's external representation to the consumer
    async fn deliver(&mut self, event: &Event) -> anyhow::Result<()>;
}

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Queue allocated, no subscriptions yet
    Created,
    /// At least one subscribe call issued
    Subscribed,
    /// Drain loop active
    Running,
    /// Shutdown in progress
    Stopping,
    /// Terminal; the broker holds no reference to this stream's queue
    Stopped,
}

/// Why a drain loop exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The consumer detached via its [`StreamHandle`]
    Detached,
    /// The sink reported a delivery failure
    SinkFailed,
    /// The stream's queue closed underneath it
    QueueClosed,
}

/// Remote control for a running stream.
///
/// Stopping is cooperative: the signal takes effect at the drain loop's
/// next suspension point. Dropping the handle without calling
/// [`stop`](Self::stop) leaves the stream running.
pub struct StreamHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl StreamHandle {
    /// Ask the stream to stop at its next suspension point
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// One consumer's bridge to the broker
pub struct EventStream {
    broker: SharedEventBroker,
    queue: EventQueue,
    rx: mpsc::Receiver<Event>,
    shutdown_rx: watch::Receiver<bool>,
    state: StreamState,
    detached: bool,
}

impl EventStream {
    /// Allocate a stream with its own bounded queue of `capacity` events
    pub fn attach(broker: SharedEventBroker, capacity: usize) -> (Self, StreamHandle) {
        let (queue, rx) = EventQueue::bounded(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        debug!(subscriber = queue.id(), capacity, "stream attached");
        (
            Self {
                broker,
                queue,
                rx,
                shutdown_rx,
                state: StreamState::Created,
                detached: false,
            },
            StreamHandle { shutdown_tx },
        )
    }

    /// Subscribe this stream's queue to one interest
    pub fn subscribe(&mut self, interest: Interest) {
        self.broker.subscribe(&self.queue, interest);
        self.state = StreamState::Subscribed;
    }

    /// Subscribe using a string interest key; false for an unknown key
    pub fn subscribe_key(&mut self, key: &str) -> bool {
        let ok = self.broker.subscribe_key(&self.queue, key);
        if ok {
            self.state = StreamState::Subscribed;
        }
        ok
    }

    /// Identity of this stream's queue
    pub fn id(&self) -> SubscriberId {
        self.queue.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Take the next event off this stream's queue.
    ///
    /// Suspends while the queue is empty. Callers wanting a bounded wait
    /// wrap this in `tokio::time::timeout`; the broker models no timeouts.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain the queue to `sink` until the consumer detaches or the sink
    /// fails.
    ///
    /// Events dequeued before a sink failure are not redelivered, and
    /// events still queued behind it are abandoned. Consuming `self` makes
    /// Stopped terminal; the queue is unsubscribed from every interest
    /// exactly once on the way out.
    pub async fn run<S: EventSink>(mut self, sink: &mut S) -> StopReason {
        self.state = StreamState::Running;
        debug!(subscriber = self.queue.id(), "stream running");

        let mut watch_open = true;
        let reason = loop {
            tokio::select! {
                changed = self.shutdown_rx.changed(), if watch_open => {
                    match changed {
                        Ok(()) => {
                            if *self.shutdown_rx.borrow() {
                                break StopReason::Detached;
                            }
                        }
                        // A dropped handle is not a stop request; keep
                        // draining until the sink or the queue ends it.
                        Err(_) => watch_open = false,
                    }
                }
                maybe = self.rx.recv() => {
                    let Some(event) = maybe else {
                        break StopReason::QueueClosed;
                    };
                    if let Err(err) = sink.deliver(&event).await {
                        warn!(
                            subscriber = self.queue.id(),
                            event = %event.id,
                            error = %err,
                            "sink delivery failed, stopping stream"
                        );
                        break StopReason::SinkFailed;
                    }
                }
            }
        };

        self.state = StreamState::Stopping;
        self.detach();
        self.state = StreamState::Stopped;
        debug!(subscriber = self.queue.id(), ?reason, "stream stopped");
        reason
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.broker.unsubscribe_all(&self.queue);
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.detach();
    }
}
