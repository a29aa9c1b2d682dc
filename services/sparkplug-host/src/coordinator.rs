//! Host Coordinator (spec.md §4.4).
//!
//! Owns the MQTT lifecycle, publishes the Host's own STATE certificates,
//! and dispatches inbound messages through the Ordering Engine and
//! Liveness Tracker to user-provided handlers. Handlers run outside any
//! internal lock (spec.md §5) — a handler panicking or re-entering the
//! Coordinator (e.g. to publish a rebirth command) cannot deadlock it.

use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use sparkplug_host_core::adapter::{self, PayloadCodec, RawDelivery};
use sparkplug_host_core::{LivenessTracker, OrderingEngine};
use sparkplug_host_protocol::topic::{self, TopicKind};
use sparkplug_host_protocol::{Message, MessageType, Metric, Payload, SparkplugVersion, StatePayload};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::config::HostConfig;
use crate::error::CoordinatorError;
use crate::time::now_millis;
use crate::transport::{MqttEventSource, MqttPublisher, TransportEvent};

/// User-provided callbacks the dispatch table invokes (spec.md §4.4).
#[async_trait]
pub trait HostHandlers: Send + Sync {
    async fn edge_node_birth(&self, group_id: &str, edge_node_id: &str, timestamp_millis: i64);
    async fn edge_node_death(&self, group_id: &str, edge_node_id: &str, timestamp_millis: i64);
    async fn node_data(&self, message: Message);
    async fn device_birth(&self, message: Message);
    async fn device_death(&self, message: Message);
    async fn device_data(&self, message: Message);
    async fn host_state(&self, host_id: &str, online: bool, timestamp_millis: i64);
    /// Unparseable topics, bad payloads, and any other adapter failure
    /// (spec.md §4.4 dispatch table, final bullet).
    async fn unsupported(&self, delivery: RawDelivery, error: CoordinatorError);
}

/// Owns the MQTT client lifecycle and dispatches decoded messages.
///
/// The inbound and outbound halves of the transport are held separately:
/// `publisher` is a cheaply-cloneable, lock-free handle any caller can use
/// concurrently, while `event_source` — which parks for the lifetime of an
/// idle connection inside `poll` — is owned exclusively by `run`'s dispatch
/// loop behind its own lock. A command-publishing call from a user handler
/// therefore never waits on the poll loop's lock (spec.md §5 "No lock is
/// held across I/O").
pub struct HostCoordinator {
    config: HostConfig,
    publisher: Arc<dyn MqttPublisher>,
    event_source: Mutex<Box<dyn MqttEventSource>>,
    codec: Arc<dyn PayloadCodec>,
    ordering: OrderingEngine,
    liveness: LivenessTracker,
    handlers: Arc<dyn HostHandlers>,
    bd_seq: AtomicU8,
}

impl HostCoordinator {
    pub fn new(
        config: HostConfig,
        publisher: Arc<dyn MqttPublisher>,
        event_source: Box<dyn MqttEventSource>,
        codec: Arc<dyn PayloadCodec>,
        ordering: OrderingEngine,
        liveness: LivenessTracker,
        handlers: Arc<dyn HostHandlers>,
    ) -> Self {
        Self {
            config,
            publisher,
            event_source: Mutex::new(event_source),
            codec,
            ordering,
            liveness,
            handlers,
            bd_seq: AtomicU8::new(0),
        }
    }

    fn next_bd_seq(&self) -> u8 {
        self.bd_seq.fetch_add(1, AtomicOrdering::SeqCst)
    }

    fn state_topic(&self) -> Result<String, CoordinatorError> {
        topic::encode_topic(
            self.config.version,
            &TopicKind::State {
                host_id: self.config.host_application_id.clone(),
            },
        )
        .map_err(|e| CoordinatorError::InvalidArgument(e.to_string()))
    }

    /// Subscribe to the wildcard Sparkplug topic and configured filters,
    /// then publish the STATE birth certificate (spec.md §4.4 startup
    /// steps 3-4; step 1, the last-will death certificate, is set when the
    /// transport is constructed, and step 2, connecting, happens lazily on
    /// the first `poll`).
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        self.announce().await
    }

    /// Subscribe to every configured filter and publish a fresh STATE birth.
    /// Shared by [`Self::start`] and `run`'s reconnect handling — a
    /// reconnecting Host re-announces itself exactly like a fresh one
    /// (spec.md §4.4 startup sequence, steps 3-4). Goes through `publisher`
    /// directly rather than the `event_source` lock, so it never contends
    /// with the poll loop.
    async fn announce(&self) -> Result<(), CoordinatorError> {
        self.publisher.subscribe(&topic::wildcard_topic(self.config.version), 1).await?;
        for filter in &self.config.subscriptions {
            self.publisher.subscribe(filter, 1).await?;
        }

        // A new bdSeq value per (birth, death) pair (spec.md §6): issued
        // here at birth, reused — not re-incremented — by the matching
        // death in `shutdown`.
        self.next_bd_seq();
        let birth = StatePayload {
            online: true,
            timestamp: now_millis(),
        };
        let payload = serde_json::to_vec(&birth).map_err(|e| CoordinatorError::Transport(e.to_string()))?;
        let topic = self.state_topic()?;
        self.publisher.publish(&topic, 1, true, payload).await?;
        info!(host_application_id = %self.config.host_application_id, "host application online");
        Ok(())
    }

    /// Run the dispatch loop until `shutdown` signals true.
    ///
    /// Alongside message dispatch, a periodic sweep resets Ordering Engine
    /// state that has been idle past `seqCacheExpiration` (spec.md §3
    /// "Lifecycles") and every `TransportEvent::Connected` after the first
    /// re-runs [`Self::announce`], so a broker-initiated reconnect is
    /// followed by the same re-subscribe-and-birth sequence a fresh
    /// connection gets.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoordinatorError> {
        const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
        let mut sweep_interval = tokio::time::interval(SWEEP_INTERVAL);
        sweep_interval.tick().await;
        let mut connected_once = false;

        loop {
            let event = {
                let mut event_source = self.event_source.lock().await;
                tokio::select! {
                    event = event_source.poll() => event?,
                    _ = sweep_interval.tick() => {
                        drop(event_source);
                        self.ordering.sweep_expired().await;
                        continue;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return Ok(());
                        }
                        continue;
                    }
                }
            };

            match event {
                TransportEvent::Message {
                    topic,
                    payload,
                    received_at_millis,
                } => {
                    self.handle_delivery(RawDelivery {
                        topic,
                        payload,
                        received_at_millis,
                    })
                    .await;
                }
                TransportEvent::Connected => {
                    if connected_once {
                        if let Err(e) = self.announce().await {
                            error!(error = %e, "failed to re-announce after reconnect");
                        }
                    }
                    connected_once = true;
                }
                TransportEvent::ConnectionLost(reason) => {
                    warn!(%reason, "mqtt connection lost, relying on broker reconnection");
                }
                TransportEvent::Other => {}
            }

            if *shutdown.borrow() {
                return Ok(());
            }
        }
    }

    async fn handle_delivery(&self, delivery: RawDelivery) {
        let message = match adapter::adapt(&delivery, self.codec.as_ref()) {
            Ok(message) => message,
            Err(err) => {
                self.handlers.unsupported(delivery, CoordinatorError::Adapter(err)).await;
                return;
            }
        };
        self.dispatch(message).await;
    }

    /// Route a decoded message through ordering/liveness per the dispatch
    /// table (spec.md §4.4).
    async fn dispatch(&self, message: Message) {
        match message.message_type {
            MessageType::NBirth => {
                let bd_seq = adapter::extract_bd_seq(&message.payload);
                if let Err(e) = self
                    .liveness
                    .update_edge_node(&message.group_id, &message.edge_node_id, true, bd_seq, message.payload.timestamp)
                    .await
                {
                    error!(error = %e, "liveness update failed on NBIRTH");
                }
                let seq = if message.payload.has_valid_seq() {
                    message.payload.seq as u8
                } else {
                    0
                };
                self.ordering.reset_with_seq(&message.group_id, &message.edge_node_id, seq).await;
                self.handlers
                    .edge_node_birth(&message.group_id, &message.edge_node_id, message.payload.timestamp)
                    .await;
            }
            MessageType::NDeath => {
                let bd_seq = adapter::extract_bd_seq(&message.payload);
                if let Err(e) = self
                    .liveness
                    .update_edge_node(&message.group_id, &message.edge_node_id, false, bd_seq, message.payload.timestamp)
                    .await
                {
                    error!(error = %e, "liveness update failed on NDEATH");
                }
                self.ordering.reset(&message.group_id, &message.edge_node_id).await;
                self.handlers
                    .edge_node_death(&message.group_id, &message.edge_node_id, message.payload.timestamp)
                    .await;
            }
            MessageType::NData | MessageType::DBirth | MessageType::DData | MessageType::DDeath => {
                self.dispatch_sequenced(message).await;
            }
            MessageType::State => {
                let online = adapter::payload_state_online(&message.payload).unwrap_or(false);
                self.handlers
                    .host_state(&message.edge_node_id, online, message.payload.timestamp)
                    .await;
            }
        }
    }

    async fn dispatch_sequenced(&self, message: Message) {
        // enableMessageOrdering=false: pass every message straight through,
        // unsequenced (spec.md §6 "Engage Ordering Engine (else pass-through)").
        let released = if self.config.enable_message_ordering {
            match self.ordering.process(message).await {
                Ok(released) => released,
                Err(e) => {
                    error!(error = %e, "ordering engine rejected a sequenced message");
                    return;
                }
            }
        } else {
            let mut message = message;
            message.is_seq_consecutive = false;
            message.is_cached = false;
            vec![message]
        };
        for message in released {
            match message.message_type {
                MessageType::NData => self.handlers.node_data(message).await,
                MessageType::DBirth | MessageType::DDeath => {
                    let online = message.message_type == MessageType::DBirth;
                    if let Some(device_id) = message.device_id.clone() {
                        if let Err(e) = self
                            .liveness
                            .update_device(&message.group_id, &message.edge_node_id, &device_id, online, message.payload.timestamp)
                            .await
                        {
                            error!(error = %e, "liveness update failed on device birth/death");
                        }
                    }
                    if online {
                        self.handlers.device_birth(message).await;
                    } else {
                        self.handlers.device_death(message).await;
                    }
                }
                MessageType::DData => self.handlers.device_data(message).await,
                other => error!(message_type = %other, "ordering engine released an unexpected message type"),
            }
        }
    }

    /// Build and publish an NCMD for an edge node.
    pub async fn publish_edge_node_command(&self, group_id: &str, edge_node_id: &str, payload: &Payload) -> Result<(), CoordinatorError> {
        self.publish_command(group_id, edge_node_id, None, MessageType::NCmd, payload).await
    }

    /// Build and publish a DCMD for a device.
    pub async fn publish_device_command(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: &str,
        payload: &Payload,
    ) -> Result<(), CoordinatorError> {
        self.publish_command(group_id, edge_node_id, Some(device_id.to_owned()), MessageType::DCmd, payload)
            .await
    }

    /// The rebirth convenience form: a single Boolean metric named
    /// `"Node Control/Rebirth"` or `"Device Control/Rebirth"` set to true
    /// (spec.md §4.4 command publication).
    pub async fn request_rebirth(&self, group_id: &str, edge_node_id: &str, device_id: Option<&str>) -> Result<(), CoordinatorError> {
        let mut payload = Payload::new(now_millis(), -1);
        payload.metrics.push(Metric::rebirth(device_id.is_some()));
        match device_id {
            Some(device_id) => self.publish_device_command(group_id, edge_node_id, device_id, &payload).await,
            None => self.publish_edge_node_command(group_id, edge_node_id, &payload).await,
        }
    }

    /// The scan-rate convenience form: a single Int64 metric named
    /// `"Node Control/Scan Rate"` or `"Device Control/Scan Rate"`
    /// (spec.md §4.4 command publication).
    pub async fn set_scan_rate(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: Option<&str>,
        millis: i64,
    ) -> Result<(), CoordinatorError> {
        if millis <= 0 {
            return Err(CoordinatorError::InvalidArgument("scan rate must be > 0".into()));
        }
        let mut payload = Payload::new(now_millis(), -1);
        payload.metrics.push(Metric::scan_rate(device_id.is_some(), millis));
        match device_id {
            Some(device_id) => self.publish_device_command(group_id, edge_node_id, device_id, &payload).await,
            None => self.publish_edge_node_command(group_id, edge_node_id, &payload).await,
        }
    }

    async fn publish_command(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: Option<String>,
        message_type: MessageType,
        payload: &Payload,
    ) -> Result<(), CoordinatorError> {
        let kind = TopicKind::Data {
            group_id: group_id.to_owned(),
            message_type,
            edge_node_id: edge_node_id.to_owned(),
            device_id,
        };
        let topic = topic::encode_topic(self.config.version, &kind).map_err(|e| CoordinatorError::InvalidArgument(e.to_string()))?;
        let bytes = self.codec.encode(message_type, payload)?;
        self.publisher.publish(&topic, 1, false, bytes).await
    }

    /// Publish the STATE death certificate, clear ordering/liveness state,
    /// and disconnect (spec.md §4.4 shutdown sequence). The matching death
    /// certificate carries the same bdSeq value `announce` issued at birth —
    /// a (birth, death) pair shares one bdSeq, so this does not increment it
    /// again.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        let death = StatePayload {
            online: false,
            timestamp: now_millis(),
        };
        let payload = serde_json::to_vec(&death).map_err(|e| CoordinatorError::Transport(e.to_string()))?;
        let topic = self.state_topic()?;

        self.publisher.publish(&topic, 1, true, payload).await?;
        self.ordering.clear_all().await;
        self.liveness.clear_all().await;
        self.publisher.disconnect().await?;
        info!(host_application_id = %self.config.host_application_id, "host application offline");
        Ok(())
    }
}
