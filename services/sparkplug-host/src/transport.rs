//! MQTT transport seam (spec.md §4.4, §5).
//!
//! The Host Coordinator is written against [`MqttPublisher`]/[`MqttEventSource`]
//! rather than `rumqttc` directly, the way the rest of this workspace keeps
//! its wire protocol (`sparkplug-host-protocol`) free of any specific I/O
//! crate. [`RumqttcTransport::connect`] is the production implementation.
//!
//! Publishing and polling are split into two traits rather than one, because
//! they have different exclusivity needs: `poll` drives the connection and
//! parks for the lifetime of an idle broker, so it is driven by exactly one
//! owner (the dispatch loop in `run`) behind its own lock; `publish` and
//! `subscribe` must stay available to any concurrent caller (a user handler
//! publishing a rebirth command, say) without waiting on that same lock —
//! spec.md §5 "No lock is held across I/O" rules out sharing one guard
//! between them.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tracing::{debug, warn};

use crate::error::CoordinatorError;

/// A transport-level event the Host Coordinator dispatch loop reacts to.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message { topic: String, payload: Vec<u8>, received_at_millis: i64 },
    /// The broker acknowledged a connection (first connect or a reconnect
    /// after [`TransportEvent::ConnectionLost`]). The Coordinator
    /// re-subscribes and republishes its STATE birth on every occurrence
    /// after the first (spec.md §4.4's startup sequence, re-run on
    /// reconnect so a Host re-announces itself the way Sparkplug requires).
    Connected,
    ConnectionLost(String),
    Other,
}

/// Publish/subscribe/disconnect operations the Host Coordinator needs.
/// Implementations must be safely callable concurrently from any number of
/// callers — no internal state here is exclusive to a single owner the way
/// [`MqttEventSource::poll`] is.
#[async_trait]
pub trait MqttPublisher: Send + Sync {
    async fn publish(&self, topic: &str, qos: u8, retain: bool, payload: Vec<u8>) -> Result<(), CoordinatorError>;
    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), CoordinatorError>;
    async fn disconnect(&self) -> Result<(), CoordinatorError>;
}

/// The inbound half of the transport. Connect lifecycle and last-will setup
/// happen at construction time, not through this trait, since they are
/// fixed by spec.md §4.4's startup sequence.
#[async_trait]
pub trait MqttEventSource: Send {
    /// Block until the next inbound message or connection event.
    async fn poll(&mut self) -> Result<TransportEvent, CoordinatorError>;
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Connection parameters for [`RumqttcTransport::connect`].
pub struct RumqttcConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Topic, QoS, retain, and payload for the last-will death certificate
    /// (spec.md §4.4 startup step 1).
    pub last_will_topic: String,
    pub last_will_payload: Vec<u8>,
}

/// Builds the `rumqttc`-backed [`MqttPublisher`]/[`MqttEventSource`] pair.
pub struct RumqttcTransport;

impl RumqttcTransport {
    /// Build the client and event loop, wiring the last-will certificate
    /// before the first `poll()` drives the actual connection. `rumqttc`'s
    /// `AsyncClient` is a cheap, thread-safe handle (it hands publishes off
    /// to the event loop over a channel), so the publisher half needs no
    /// `Mutex` of its own.
    pub fn connect(config: RumqttcConfig) -> (RumqttcPublisher, RumqttcEventSource) {
        let mut options = MqttOptions::new(config.client_id, config.host, config.port);
        options.set_keep_alive(std::time::Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(
            config.last_will_topic,
            config.last_will_payload,
            QoS::AtLeastOnce,
            true,
        ));
        let (client, event_loop) = AsyncClient::new(options, 64);
        (RumqttcPublisher { client }, RumqttcEventSource { event_loop })
    }
}

/// The shared, lock-free publish/subscribe handle.
#[derive(Clone)]
pub struct RumqttcPublisher {
    client: AsyncClient,
}

#[async_trait]
impl MqttPublisher for RumqttcPublisher {
    async fn publish(&self, topic: &str, qos: u8, retain: bool, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        self.client
            .publish(topic, to_qos(qos), retain, payload)
            .await
            .map_err(|e| CoordinatorError::Transport(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), CoordinatorError> {
        self.client
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| CoordinatorError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), CoordinatorError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| CoordinatorError::Transport(e.to_string()))
    }
}

/// The exclusively-owned poll loop handle.
pub struct RumqttcEventSource {
    event_loop: EventLoop,
}

#[async_trait]
impl MqttEventSource for RumqttcEventSource {
    async fn poll(&mut self) -> Result<TransportEvent, CoordinatorError> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                        received_at_millis: crate::time::now_millis(),
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    debug!("mqtt connection established");
                    return Ok(TransportEvent::Connected);
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "mqtt connection lost");
                    return Ok(TransportEvent::ConnectionLost(e.to_string()));
                }
            }
        }
    }
}
