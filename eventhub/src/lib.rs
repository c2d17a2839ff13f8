//! Event fan-out hub for orchestrator telemetry
//!
//! This library provides the pub/sub core that decouples event producers
//! (node lifecycle, tool execution, learning cycles, task flow) from their
//! consumers (transport connections, auditors, dashboards).
//!
//! # Architecture
//!
//! The crate consists of four main components:
//!
//! 1. **Event Types** (`types.rs`): The closed set of event kinds, the
//!    immutable `Event` record, and typed per-kind payload schemas.
//!
//! 2. **Event Broker** (`broker.rs`): Fan-out over bounded per-subscriber
//!    queues. Publishing never blocks on a slow consumer; a queue that
//!    cannot keep up is dropped and evicted.
//!
//! 3. **Event History** (`history.rs`): Bounded rolling buffer of recent
//!    events for late joiners and audits.
//!
//! 4. **Event Stream** (`stream.rs`): Per-consumer drain loop forwarding a
//!    subscriber queue to an abstract sink.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│ Event Broker │────▶│ Subscriber   │
//! │   (emit)     │     │  (fan-out)   │     │ queues       │
//! └──────────────┘     └──────┬───────┘     └──────┬───────┘
//!                             │                    │
//!                             ▼                    ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │   History    │     │ EventStream  │
//!                      │ (bounded)    │     │ (drain→sink) │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use eventhub::{EventBroker, EventStream, Interest};
//! use eventhub::payload::ToolExecuted;
//!
//! // One broker per logical system, passed explicitly to producers and
//! // consumers.
//! let broker = EventBroker::new().shared();
//!
//! // Attach a consumer stream and subscribe its queue.
//! let (mut stream, handle) = EventStream::attach(broker.clone(), 64);
//! stream.subscribe(Interest::All);
//! tokio::spawn(async move { stream.run(&mut sink).await });
//!
//! // Publish from a hot path; this never blocks.
//! broker.emit(&ToolExecuted {
//!     tool: "cargo_check".into(),
//!     success: true,
//!     duration_ms: 420,
//! });
//!
//! // Late joiners can catch up from history.
//! let recent = broker.get_history(Interest::All, Some(50));
//!
//! handle.stop();
//! ```

pub mod broker;
pub mod history;
pub mod stream;
pub mod types;

// Re-export core types
pub use broker::{
    BrokerStats, EventBroker, EventQueue, SharedEventBroker, SubscriberId,
    DEFAULT_HISTORY_CAPACITY,
};
pub use history::EventHistory;
pub use stream::{EventSink, EventStream, StopReason, StreamHandle, StreamState};
pub use types::{
    payload, Event, EventData, EventId, EventKind, EventPayload, Interest, NodeId, TaskId,
    UnknownInterest,
};
