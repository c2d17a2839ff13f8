//! Event types for orchestrator telemetry
//!
//! Defines the closed set of event kinds, the immutable `Event` record that
//! flows through the broker, and the typed payload schemas producers use at
//! the call site. The broker itself never interprets payloads; the structs
//! in [`payload`] are the per-kind shape producers and consumers agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for events
pub type EventId = String;

/// Identifier for swarm nodes appearing in event payloads
pub type NodeId = String;

/// Identifier for dispatched tasks appearing in event payloads
pub type TaskId = String;

/// Open key-value payload attached to an event.
///
/// The broker carries this without interpreting it. Producers build it from
/// a [`payload`] struct; consumers of a given kind parse it back the same
/// way.
pub type EventData = Map<String, Value>;

/// Priority for routine background chatter (heartbeats)
pub const PRIORITY_LOW: u8 = 2;

/// Priority for ordinary lifecycle events
pub const PRIORITY_NORMAL: u8 = 5;

/// Priority for events an operator should see promptly
pub const PRIORITY_HIGH: u8 = 8;

/// Priority for critical alerts
pub const PRIORITY_CRITICAL: u8 = 10;

/// All event kinds the broker routes.
///
/// This enumeration is closed: subscribing to anything outside it (other
/// than the wildcard) is rejected at the string edge by [`Interest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An evolution cycle produced and applied a new strategy
    EvolutionApplied,
    /// A node joined the swarm
    NodeRegistered,
    /// A node left or was lost
    NodeDisconnected,
    /// Periodic node liveness report
    NodeHeartbeat,
    /// A tool invocation finished
    ToolExecuted,
    /// A confidence score moved
    ConfidenceChanged,
    /// A learning session began
    LearningStarted,
    /// A learning session finished
    LearningCompleted,
    /// A task was handed to a node
    TaskDispatched,
    /// A task finished
    TaskCompleted,
    /// Operator-facing alert
    SystemAlert,
}

impl EventKind {
    /// All kinds, in declaration order
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::EvolutionApplied,
            EventKind::NodeRegistered,
            EventKind::NodeDisconnected,
            EventKind::NodeHeartbeat,
            EventKind::ToolExecuted,
            EventKind::ConfidenceChanged,
            EventKind::LearningStarted,
            EventKind::LearningCompleted,
            EventKind::TaskDispatched,
            EventKind::TaskCompleted,
            EventKind::SystemAlert,
        ]
    }

    /// Get the kind name as used in interest keys and serialized events
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EvolutionApplied => "evolution_applied",
            EventKind::NodeRegistered => "node_registered",
            EventKind::NodeDisconnected => "node_disconnected",
            EventKind::NodeHeartbeat => "node_heartbeat",
            EventKind::ToolExecuted => "tool_executed",
            EventKind::ConfidenceChanged => "confidence_changed",
            EventKind::LearningStarted => "learning_started",
            EventKind::LearningCompleted => "learning_completed",
            EventKind::TaskDispatched => "task_dispatched",
            EventKind::TaskCompleted => "task_completed",
            EventKind::SystemAlert => "system_alert",
        }
    }

    /// Priority attached to events of this kind unless overridden
    pub fn default_priority(&self) -> u8 {
        match self {
            EventKind::NodeHeartbeat => PRIORITY_LOW,
            EventKind::SystemAlert => PRIORITY_HIGH,
            _ => PRIORITY_NORMAL,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = UnknownInterest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::all()
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownInterest(s.to_string()))
    }
}

/// Error for interest keys naming neither a known event kind nor the wildcard
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown interest key: {0}")]
pub struct UnknownInterest(pub String);

/// Selects which events a subscriber queue receives: one concrete kind, or
/// every kind via the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Receive every event regardless of kind
    All,
    /// Receive only events of one kind
    Kind(EventKind),
}

impl Interest {
    /// Canonical spelling of the wildcard at the string edge
    pub const WILDCARD: &'static str = "all";

    /// Whether an event of `kind` matches this interest
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Interest::All => true,
            Interest::Kind(k) => *k == kind,
        }
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interest::All => f.write_str(Self::WILDCARD),
            Interest::Kind(kind) => f.write_str(kind.as_str()),
        }
    }
}

impl std::str::FromStr for Interest {
    type Err = UnknownInterest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "*" is accepted from transports that spell the wildcard that way.
        if s == Self::WILDCARD || s == "*" {
            return Ok(Interest::All);
        }
        s.parse::<EventKind>().map(Interest::Kind)
    }
}

/// One immutable record of a system occurrence.
///
/// Constructed once and never mutated afterwards; the broker clones it per
/// delivery and into history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, assigned at construction
    pub id: EventId,
    /// Which kind of occurrence this records
    pub kind: EventKind,
    /// Kind-specific payload, uninterpreted by the broker
    pub data: EventData,
    /// Creation time, assigned once at construction
    pub timestamp: DateTime<Utc>,
    /// Urgency hint for logging and display only; delivery stays FIFO
    pub priority: u8,
}

impl Event {
    /// Create an event with the kind's default priority
    pub fn new(kind: EventKind, data: EventData) -> Self {
        Self {
            id: Self::new_id(),
            kind,
            data,
            timestamp: Utc::now(),
            priority: kind.default_priority(),
        }
    }

    /// Build an event from a typed payload struct
    pub fn from_payload<P: EventPayload>(payload: &P) -> Self {
        let data = match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => map,
            // Non-object payloads flatten to an empty map.
            _ => EventData::new(),
        };
        Self::new(P::KIND, data).with_priority(payload.priority())
    }

    /// Override the priority hint
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Create a new unique event id
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Typed payload schema for one event kind.
///
/// Implementors are plain serializable structs; [`Event::from_payload`]
/// flattens them into the event's open `data` map, so the broker core stays
/// schema-agnostic while call sites stay typed.
pub trait EventPayload: Serialize {
    /// The kind of event this payload produces
    const KIND: EventKind;

    /// Priority attached to events built from this payload
    fn priority(&self) -> u8 {
        Self::KIND.default_priority()
    }
}

pub mod payload {
    //! Per-kind payload schemas.
    //!
    //! One struct per [`EventKind`]; field names here are the keys that end
    //! up in `Event::data`.

    use serde::{Deserialize, Serialize};

    use super::{
        EventKind, EventPayload, NodeId, TaskId, PRIORITY_CRITICAL, PRIORITY_HIGH, PRIORITY_NORMAL,
    };

    /// Severity of a [`SystemAlert`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertLevel {
        Info,
        Warning,
        Critical,
    }

    impl std::fmt::Display for AlertLevel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                AlertLevel::Info => write!(f, "info"),
                AlertLevel::Warning => write!(f, "warning"),
                AlertLevel::Critical => write!(f, "critical"),
            }
        }
    }

    /// An evolution cycle produced and applied a new strategy
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EvolutionApplied {
        pub generation: u64,
        pub fitness: f64,
        pub description: String,
    }

    impl EventPayload for EvolutionApplied {
        const KIND: EventKind = EventKind::EvolutionApplied;
    }

    /// A node joined the swarm
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NodeRegistered {
        pub node_id: NodeId,
        pub address: String,
        pub capabilities: Vec<String>,
    }

    impl EventPayload for NodeRegistered {
        const KIND: EventKind = EventKind::NodeRegistered;
    }

    /// A node left or was lost
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NodeDisconnected {
        pub node_id: NodeId,
        pub reason: String,
    }

    impl EventPayload for NodeDisconnected {
        const KIND: EventKind = EventKind::NodeDisconnected;
    }

    /// Periodic node liveness report
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NodeHeartbeat {
        pub node_id: NodeId,
        pub load: f64,
        pub uptime_secs: u64,
    }

    impl EventPayload for NodeHeartbeat {
        const KIND: EventKind = EventKind::NodeHeartbeat;
    }

    /// A tool invocation finished
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ToolExecuted {
        pub tool: String,
        pub success: bool,
        pub duration_ms: u64,
    }

    impl EventPayload for ToolExecuted {
        const KIND: EventKind = EventKind::ToolExecuted;
    }

    /// A confidence score moved
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConfidenceChanged {
        pub subject: String,
        pub previous: f64,
        pub current: f64,
    }

    impl EventPayload for ConfidenceChanged {
        const KIND: EventKind = EventKind::ConfidenceChanged;
    }

    /// A learning session began
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LearningStarted {
        pub topic: String,
        pub trigger: String,
    }

    impl EventPayload for LearningStarted {
        const KIND: EventKind = EventKind::LearningStarted;
    }

    /// A learning session finished
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LearningCompleted {
        pub topic: String,
        pub improvement: f64,
        pub duration_ms: u64,
    }

    impl EventPayload for LearningCompleted {
        const KIND: EventKind = EventKind::LearningCompleted;
    }

    /// A task was handed to a node
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskDispatched {
        pub task_id: TaskId,
        pub node_id: NodeId,
    }

    impl EventPayload for TaskDispatched {
        const KIND: EventKind = EventKind::TaskDispatched;
    }

    /// A task finished
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskCompleted {
        pub task_id: TaskId,
        pub success: bool,
        pub duration_ms: u64,
    }

    impl EventPayload for TaskCompleted {
        const KIND: EventKind = EventKind::TaskCompleted;
    }

    /// Operator-facing alert
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SystemAlert {
        pub level: AlertLevel,
        pub message: String,
    }

    impl EventPayload for SystemAlert {
        const KIND: EventKind = EventKind::SystemAlert;

        fn priority(&self) -> u8 {
            match self.level {
                AlertLevel::Info => PRIORITY_NORMAL,
                AlertLevel::Warning => PRIORITY_HIGH,
                AlertLevel::Critical => PRIORITY_CRITICAL,
            }
        }
    }
}
