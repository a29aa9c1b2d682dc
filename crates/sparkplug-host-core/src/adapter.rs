//! Topic & Payload Adapter (spec.md §4.1).
//!
//! Converts a raw inbound MQTT delivery into a [`Message`] or rejects it as
//! unsupported. Stateless, no concurrency concerns — matching the
//! free-function parsing style the rest of this workspace's lower layers
//! use for wire-format decoding.

use sparkplug_host_protocol::{
    topic::{self, ParsedTopic, TopicKind},
    Message, MessageType, Metric, MetricValue, Payload, SparkplugVersion, StatePayload,
};

use crate::error::AdapterError;

/// A raw, undecoded delivery from the MQTT transport.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_millis: i64,
}

/// The Sparkplug protobuf codec seam.
///
/// Protobuf encode/decode is assumed available as external functions
/// (spec.md §1); this crate depends only on the trait, not on any specific
/// `.proto`-generated bindings. `sparkplug-host`'s default implementation
/// wires a concrete codec crate at the binary's composition root.
pub trait PayloadCodec: Send + Sync {
    /// Decode a non-STATE Sparkplug payload.
    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<Payload, AdapterError>;

    /// Encode a non-STATE Sparkplug payload, used for command publication.
    fn encode(&self, message_type: MessageType, payload: &Payload) -> Result<Vec<u8>, AdapterError>;
}

fn state_payload_to_payload(state: StatePayload) -> Payload {
    let mut payload = Payload::new(state.timestamp, -1);
    payload.metrics.push(Metric::new(
        "online",
        sparkplug_host_protocol::DataType::Boolean,
        MetricValue::Boolean(state.online),
    ));
    payload
}

/// Look up the synthesized `"online"` metric a STATE-derived [`Payload`]
/// carries (see [`state_payload_to_payload`]).
pub fn payload_state_online(payload: &Payload) -> Option<bool> {
    payload.metrics.iter().find(|m| m.name == "online").and_then(|m| {
        if let MetricValue::Boolean(b) = m.value {
            Some(b)
        } else {
            None
        }
    })
}

/// Parse an inbound topic (spec.md §4.1 `parseTopic`).
pub fn parse_topic(topic: &str) -> Result<ParsedTopic, AdapterError> {
    topic::parse_topic(topic).map_err(|e| AdapterError::UnsupportedTopic(e.to_string()))
}

/// Decode an inbound payload (spec.md §4.1 `decodePayload`).
///
/// STATE payloads decode as UTF-8 JSON `{"online": bool, "timestamp": i64}`;
/// all others decode via the injected [`PayloadCodec`].
pub fn decode_payload(
    message_type: MessageType,
    bytes: &[u8],
    codec: &dyn PayloadCodec,
) -> Result<Payload, AdapterError> {
    if message_type == MessageType::State {
        let state: StatePayload = serde_json::from_slice(bytes)
            .map_err(|e| AdapterError::BadPayload(format!("STATE JSON decode: {e}")))?;
        Ok(state_payload_to_payload(state))
    } else {
        codec.decode(message_type, bytes)
    }
}

/// Convert a [`RawDelivery`] into a normalized [`Message`], parsing the
/// topic and decoding the payload in one step.
///
/// Returns the parsed topic alongside the message so the caller (the Host
/// Coordinator) can recover the group/edge/device identity even when this
/// function ultimately fails on payload decode (needed so `BadPayload`
/// failures can still be logged with topic context before being routed to
/// the `unsupported` handler).
pub fn adapt(delivery: &RawDelivery, codec: &dyn PayloadCodec) -> Result<Message, AdapterError> {
    let parsed = parse_topic(&delivery.topic)?;
    match parsed.kind {
        TopicKind::State { host_id } => {
            let payload = decode_payload(MessageType::State, &delivery.payload, codec)?;
            Ok(Message {
                version: parsed.version,
                message_type: MessageType::State,
                group_id: String::new(),
                edge_node_id: host_id,
                device_id: None,
                payload,
                received_at_millis: delivery.received_at_millis,
                is_seq_consecutive: false,
                is_cached: false,
            })
        }
        TopicKind::Data {
            group_id,
            message_type,
            edge_node_id,
            device_id,
        } => {
            let payload = decode_payload(message_type, &delivery.payload, codec)?;
            Ok(Message {
                version: parsed.version,
                message_type,
                group_id,
                edge_node_id,
                device_id,
                payload,
                received_at_millis: delivery.received_at_millis,
                is_seq_consecutive: false,
                is_cached: false,
            })
        }
    }
}

/// Extract the `bdSeq` metric (spec.md §4.1 `extractBdSeq`).
pub fn extract_bd_seq(payload: &Payload) -> i64 {
    payload.extract_bd_seq()
}

/// Build the NCMD/DCMD/STATE topic a command or certificate is published to
/// (the encoder counterpart [`parse_topic`] needs — spec.md §4.4).
pub fn encode_topic(
    version: SparkplugVersion,
    kind: &TopicKind,
) -> Result<String, AdapterError> {
    topic::encode_topic(version, kind).map_err(|e| AdapterError::UnsupportedTopic(e.to_string()))
}
