//! Integration test for the per-consumer stream path
//!
//! Drives the full producer → broker → stream → sink pipeline the way a
//! transport layer would: string interest keys at subscription time and a
//! sink that serializes each event to a JSON line.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use eventhub::payload::{NodeRegistered, TaskCompleted};
use eventhub::{Event, EventBroker, EventKind, EventSink, EventStream, StopReason};

/// Serializes events into the envelope a connection would transmit
struct JsonLineSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl EventSink for JsonLineSink {
    async fn deliver(&mut self, event: &Event) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        self.0
            .send(line)
            .map_err(|_| anyhow::anyhow!("connection closed"))
    }
}

#[tokio::test]
async fn test_transport_round_trip() {
    let broker = EventBroker::new().shared();
    let (mut stream, handle) = EventStream::attach(broker.clone(), 8);

    // Interest keys arrive from the wire as strings.
    assert!(stream.subscribe_key("node_registered"));
    assert!(stream.subscribe_key("task_completed"));
    assert!(!stream.subscribe_key("warp_drive_engaged"));

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    let drain = tokio::spawn(async move {
        let mut sink = JsonLineSink(line_tx);
        stream.run(&mut sink).await
    });

    broker.emit(&NodeRegistered {
        node_id: "node-7".to_string(),
        address: "10.1.2.3:7400".to_string(),
        capabilities: vec!["inference".to_string(), "tools".to_string()],
    });
    broker.emit(&TaskCompleted {
        task_id: "task-42".to_string(),
        success: true,
        duration_ms: 1337,
    });

    let first = timeout(Duration::from_secs(5), line_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: Event = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed.kind, EventKind::NodeRegistered);
    assert_eq!(parsed.data["node_id"], "node-7");
    assert_eq!(parsed.data["capabilities"][1], "tools");

    let second = timeout(Duration::from_secs(5), line_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: Event = serde_json::from_str(&second).unwrap();
    assert_eq!(parsed.kind, EventKind::TaskCompleted);
    assert_eq!(parsed.data["success"], true);

    handle.stop();
    let reason = timeout(Duration::from_secs(5), drain).await.unwrap().unwrap();
    assert_eq!(reason, StopReason::Detached);

    // Teardown left nothing registered; history still serves late joiners.
    let stats = broker.get_stats();
    assert_eq!(stats.active_subscriptions, 0);
    assert_eq!(stats.total_events, 2);
    assert_eq!(
        broker
            .get_history(eventhub::Interest::Kind(EventKind::TaskCompleted), None)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_two_streams_fail_independently() {
    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn deliver(&mut self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("peer went away")
        }
    }

    let broker = EventBroker::new().shared();

    let (mut healthy, healthy_handle) = EventStream::attach(broker.clone(), 8);
    healthy.subscribe(eventhub::Interest::All);
    let (mut broken, _broken_handle) = EventStream::attach(broker.clone(), 8);
    broken.subscribe(eventhub::Interest::All);

    // Give the broken stream something to choke on before it runs.
    broker.emit(&TaskCompleted {
        task_id: "task-1".to_string(),
        success: false,
        duration_ms: 9,
    });

    let reason = timeout(Duration::from_secs(5), broken.run(&mut FailingSink))
        .await
        .unwrap();
    assert_eq!(reason, StopReason::SinkFailed);

    // The healthy stream still drains its own copy plus later events.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    let drain = tokio::spawn(async move {
        let mut sink = JsonLineSink(line_tx);
        healthy.run(&mut sink).await
    });

    broker.emit(&TaskCompleted {
        task_id: "task-2".to_string(),
        success: true,
        duration_ms: 12,
    });

    for expected_task in ["task-1", "task-2"] {
        let line = timeout(Duration::from_secs(5), line_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.data["task_id"], expected_task);
    }

    healthy_handle.stop();
    let reason = timeout(Duration::from_secs(5), drain).await.unwrap().unwrap();
    assert_eq!(reason, StopReason::Detached);
    assert_eq!(broker.get_stats().active_subscriptions, 0);
}
