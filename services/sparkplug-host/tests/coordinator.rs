//! Integration tests for the Host Coordinator's startup sequence and
//! dispatch table, driven against in-memory [`MqttPublisher`]/[`MqttEventSource`]
//! fakes rather than a real broker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sparkplug_host::{
    config::HostConfig, CoordinatorError, HostCoordinator, HostHandlers, JsonPayloadCodec, MqttEventSource, MqttPublisher,
    TransportEvent,
};
use sparkplug_host_core::adapter::RawDelivery;
use sparkplug_host_core::{LivenessTracker, OrderingEngine, OrderingEngineConfig};
use sparkplug_host_protocol::{DataType, Message, Metric, MetricValue, Payload, SparkplugVersion};
use tokio::sync::{watch, Mutex as AsyncMutex};

#[derive(Debug, Clone)]
struct Published {
    topic: String,
    qos: u8,
    retain: bool,
    payload: Vec<u8>,
}

/// Records every publish/subscribe call for assertion. Shared between the
/// test and the [`FakePublisher`] it hands to the coordinator (which needs
/// `Send + Sync` to live behind `Arc<dyn MqttPublisher>`).
#[derive(Default, Clone)]
struct FakeTransportHandle {
    published: Arc<AsyncMutex<Vec<Published>>>,
    subscriptions: Arc<AsyncMutex<Vec<(String, u8)>>>,
}

/// An [`MqttPublisher`] fake backed by a shared handle so the test keeps its
/// own reference after the coordinator takes ownership of the other clone.
struct FakePublisher {
    handle: FakeTransportHandle,
}

#[async_trait]
impl MqttPublisher for FakePublisher {
    async fn publish(&self, topic: &str, qos: u8, retain: bool, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        self.handle.published.lock().await.push(Published {
            topic: topic.to_owned(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), CoordinatorError> {
        self.handle.subscriptions.lock().await.push((topic.to_owned(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}

/// An [`MqttEventSource`] fake: replays a queue of scripted inbound events.
struct FakeEventSource {
    events: AsyncMutex<VecDeque<TransportEvent>>,
}

impl FakeEventSource {
    fn new(events: Vec<TransportEvent>) -> Self {
        Self {
            events: AsyncMutex::new(events.into()),
        }
    }
}

#[async_trait]
impl MqttEventSource for FakeEventSource {
    async fn poll(&mut self) -> Result<TransportEvent, CoordinatorError> {
        let next = self.events.lock().await.pop_front();
        match next {
            Some(event) => Ok(event),
            // No more scripted events: park forever so the dispatch loop's
            // `select!` only ever resolves via the shutdown signal.
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Builds a [`FakePublisher`]/[`FakeEventSource`] pair from a handle and a
/// scripted event list, already wrapped the way [`HostCoordinator::new`]
/// expects them.
fn fake_transport(handle: FakeTransportHandle, events: Vec<TransportEvent>) -> (Arc<dyn MqttPublisher>, Box<dyn MqttEventSource>) {
    (Arc::new(FakePublisher { handle }), Box::new(FakeEventSource::new(events)))
}

#[derive(Default)]
struct RecordingHandlers {
    edge_births: AsyncMutex<Vec<(String, String)>>,
    edge_deaths: AsyncMutex<Vec<(String, String)>>,
    node_data: AsyncMutex<Vec<Message>>,
    device_births: AsyncMutex<Vec<Message>>,
    device_deaths: AsyncMutex<Vec<Message>>,
    unsupported: AsyncMutex<Vec<String>>,
}

#[async_trait]
impl HostHandlers for RecordingHandlers {
    async fn edge_node_birth(&self, group_id: &str, edge_node_id: &str, _timestamp_millis: i64) {
        self.edge_births.lock().await.push((group_id.to_owned(), edge_node_id.to_owned()));
    }

    async fn edge_node_death(&self, group_id: &str, edge_node_id: &str, _timestamp_millis: i64) {
        self.edge_deaths.lock().await.push((group_id.to_owned(), edge_node_id.to_owned()));
    }

    async fn node_data(&self, message: Message) {
        self.node_data.lock().await.push(message);
    }

    async fn device_birth(&self, message: Message) {
        self.device_births.lock().await.push(message);
    }

    async fn device_death(&self, message: Message) {
        self.device_deaths.lock().await.push(message);
    }

    async fn device_data(&self, _message: Message) {}

    async fn host_state(&self, _host_id: &str, _online: bool, _timestamp_millis: i64) {}

    async fn unsupported(&self, delivery: RawDelivery, _error: CoordinatorError) {
        self.unsupported.lock().await.push(delivery.topic);
    }
}

fn test_config() -> HostConfig {
    HostConfig {
        version: SparkplugVersion::V3_0_0,
        host_application_id: "HostA".to_owned(),
        broker_host: "localhost".to_owned(),
        broker_port: 1883,
        subscriptions: Vec::new(),
        enable_message_ordering: true,
        seq_cache_expiration: Duration::from_secs(7200),
        seq_reorder_timeout: Duration::from_millis(50),
        send_rebirth_when_timeout: true,
    }
}

fn ordering_engine(config: &HostConfig) -> OrderingEngine {
    OrderingEngine::new(
        OrderingEngineConfig {
            reorder_timeout: config.seq_reorder_timeout,
            cache_expiration: Some(config.seq_cache_expiration),
            send_rebirth_when_timeout: config.send_rebirth_when_timeout,
        },
        Arc::new(|_: Vec<Message>| {}),
        Arc::new(|_: String, _: String| {}),
    )
}

fn nbirth_event(seq: i32, bd_seq: u64) -> TransportEvent {
    let mut payload = Payload::new(1_000, seq);
    payload.metrics.push(Metric::new("bdSeq", DataType::UInt64, MetricValue::UInt(bd_seq)));
    TransportEvent::Message {
        topic: "spBv1.0/Plant1/NBIRTH/Edge1".to_owned(),
        payload: serde_json::to_vec(&payload).unwrap(),
        received_at_millis: 1_000,
    }
}

fn data_event(topic: &str, seq: i32, timestamp: i64) -> TransportEvent {
    TransportEvent::Message {
        topic: topic.to_owned(),
        payload: serde_json::to_vec(&Payload::new(timestamp, seq)).unwrap(),
        received_at_millis: timestamp,
    }
}

/// Startup publishes the retained STATE birth certificate and subscribes to
/// the wildcard topic before any configured extra filter (spec.md §4.4
/// startup sequence).
#[tokio::test]
async fn start_subscribes_and_publishes_state_birth() {
    let config = test_config();
    let ordering = ordering_engine(&config);
    let handle = FakeTransportHandle::default();
    let (publisher, event_source) = fake_transport(handle.clone(), Vec::new());
    let coordinator = HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::new(RecordingHandlers::default()),
    );

    coordinator.start().await.expect("start succeeds");

    let subscriptions = handle.subscriptions.lock().await;
    assert_eq!(subscriptions.as_slice(), &[("spBv1.0/#".to_string(), 1)]);
    drop(subscriptions);

    let published = handle.published.lock().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "spBv1.0/STATE/HostA");
    assert_eq!(published[0].qos, 1);
    assert!(published[0].retain);
    let state: sparkplug_host_protocol::StatePayload = serde_json::from_slice(&published[0].payload).unwrap();
    assert!(state.online);
}

#[tokio::test]
async fn dispatch_routes_nbirth_then_reorders_ndata_and_dbirth() {
    let config = test_config();
    let ordering = ordering_engine(&config);

    let events = vec![
        nbirth_event(5, 7),
        // NBIRTH seeds lastSeq=5; next expected NDATA seq is 6. Deliver out
        // of order: seq 7 first (buffered), then seq 6 (fills the gap and
        // releases both in order).
        data_event("spBv1.0/Plant1/NDATA/Edge1", 7, 1_100),
        data_event("spBv1.0/Plant1/NDATA/Edge1", 6, 1_050),
        // Continuing the same per-edge sequence, a DBIRTH for a child device.
        data_event("spBv1.0/Plant1/DBIRTH/Edge1/Dev1", 8, 1_200),
    ];
    let (publisher, event_source) = fake_transport(FakeTransportHandle::default(), events);
    let handlers = Arc::new(RecordingHandlers::default());

    let coordinator = Arc::new(HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::clone(&handlers) as Arc<dyn HostHandlers>,
    ));

    coordinator.start().await.expect("start succeeds");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_coordinator = Arc::clone(&coordinator);
    let run_handle = tokio::spawn(async move { run_coordinator.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown_tx.send(true);
    run_handle.await.expect("task joins").expect("run exits cleanly");

    assert_eq!(handlers.edge_births.lock().await.as_slice(), &[("Plant1".to_string(), "Edge1".to_string())]);

    let node_data = handlers.node_data.lock().await;
    let seqs: Vec<i32> = node_data.iter().map(|m| m.payload.seq).collect();
    assert_eq!(seqs, vec![6, 7]);
    assert!(node_data.iter().all(|m| m.is_seq_consecutive));

    let device_births = handlers.device_births.lock().await;
    assert_eq!(device_births.len(), 1);
    assert_eq!(device_births[0].device_id.as_deref(), Some("Dev1"));
}

/// With `enable_message_ordering=false` every NDATA/DDATA/DBIRTH/DDEATH
/// passes straight through unsequenced, regardless of arrival order
/// (spec.md §6 "Engage Ordering Engine (else pass-through)").
#[tokio::test]
async fn disabled_ordering_passes_messages_through_unsequenced() {
    let mut config = test_config();
    config.enable_message_ordering = false;
    let ordering = ordering_engine(&config);

    let events = vec![
        data_event("spBv1.0/Plant1/NDATA/Edge1", 7, 1_100),
        data_event("spBv1.0/Plant1/NDATA/Edge1", 3, 1_050),
    ];
    let (publisher, event_source) = fake_transport(FakeTransportHandle::default(), events);
    let handlers = Arc::new(RecordingHandlers::default());

    let coordinator = Arc::new(HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::clone(&handlers) as Arc<dyn HostHandlers>,
    ));

    coordinator.start().await.expect("start succeeds");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_coordinator = Arc::clone(&coordinator);
    let run_handle = tokio::spawn(async move { run_coordinator.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);
    run_handle.await.expect("task joins").expect("run exits cleanly");

    let node_data = handlers.node_data.lock().await;
    let seqs: Vec<i32> = node_data.iter().map(|m| m.payload.seq).collect();
    // Delivered in arrival order (7, then 3), not reordered — the Ordering
    // Engine was never consulted.
    assert_eq!(seqs, vec![7, 3]);
    assert!(node_data.iter().all(|m| !m.is_seq_consecutive && !m.is_cached));
}

/// A command-publishing call does not wait on the dispatch loop's poll —
/// it goes through the shared publisher handle, not the event source lock
/// `run` holds while idling on `poll` (spec.md §5 "No lock is held across
/// I/O").
#[tokio::test]
async fn publish_command_does_not_block_on_idle_dispatch_loop() {
    let config = test_config();
    let ordering = ordering_engine(&config);
    let handle = FakeTransportHandle::default();
    // No scripted events: `run`'s poll parks forever until shutdown.
    let (publisher, event_source) = fake_transport(handle.clone(), Vec::new());
    let handlers = Arc::new(RecordingHandlers::default());

    let coordinator = Arc::new(HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::clone(&handlers) as Arc<dyn HostHandlers>,
    ));

    coordinator.start().await.expect("start succeeds");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_coordinator = Arc::clone(&coordinator);
    let run_handle = tokio::spawn(async move { run_coordinator.run(shutdown_rx).await });

    // `run` is now parked inside `poll`, holding the event source lock. A
    // command publish must still complete promptly.
    tokio::time::timeout(Duration::from_millis(200), coordinator.request_rebirth("Plant1", "Edge1", None))
        .await
        .expect("publish does not block on the idle poll loop")
        .expect("publish succeeds");

    let _ = shutdown_tx.send(true);
    run_handle.await.expect("task joins").expect("run exits cleanly");

    // One retained STATE birth at start, plus the rebirth NCMD.
    assert_eq!(handle.published.lock().await.len(), 2);
}

/// Shutdown publishes the retained STATE death certificate and disconnects
/// (spec.md §4.4 shutdown sequence); ordering/liveness state is cleared so a
/// subsequent restart starts clean.
#[tokio::test]
async fn shutdown_publishes_state_death() {
    let config = test_config();
    let ordering = ordering_engine(&config);
    let (publisher, event_source) = fake_transport(FakeTransportHandle::default(), Vec::new());
    let coordinator = HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::new(RecordingHandlers::default()),
    );

    coordinator.start().await.expect("start succeeds");
    coordinator.shutdown().await.expect("shutdown succeeds");
}

/// An unparseable topic is routed to the `unsupported` handler rather than
/// panicking or silently dropping (spec.md §4.4 dispatch table, final bullet).
#[tokio::test]
async fn unparseable_topic_reaches_unsupported_handler() {
    let config = test_config();
    let ordering = ordering_engine(&config);
    let (publisher, event_source) = fake_transport(
        FakeTransportHandle::default(),
        vec![TransportEvent::Message {
            topic: "spBv1.0/Plant1/BOGUS/Edge1".to_owned(),
            payload: b"irrelevant".to_vec(),
            received_at_millis: 0,
        }],
    );
    let handlers = Arc::new(RecordingHandlers::default());
    let coordinator = Arc::new(HostCoordinator::new(
        config,
        publisher,
        event_source,
        Arc::new(JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::clone(&handlers) as Arc<dyn HostHandlers>,
    ));

    coordinator.start().await.expect("start succeeds");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_coordinator = Arc::clone(&coordinator);
    let run_handle = tokio::spawn(async move { run_coordinator.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);
    run_handle.await.expect("task joins").expect("run exits cleanly");

    assert_eq!(handlers.unsupported.lock().await.as_slice(), &["spBv1.0/Plant1/BOGUS/Edge1".to_string()]);
}
