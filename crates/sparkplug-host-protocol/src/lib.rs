//! Wire-adjacent types for the Sparkplug B Host Application core.
//!
//! This crate carries no MQTT transport and no protobuf codec of its own —
//! it defines the normalized [`Message`]/[`Payload`] shapes the rest of the
//! workspace operates on, the Sparkplug topic grammar, and the error kinds
//! shared by the adapter, ordering engine, liveness tracker, and host
//! coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod topic;

pub use topic::{parse_topic, validate_identifier, ParsedTopic, TopicKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error kinds shared across the Sparkplug host core (spec.md §7).
///
/// Each component-level error type in `sparkplug-host-core` and
/// `sparkplug-host` wraps the variant(s) it can actually produce rather than
/// matching on this full enum — see their own `AdapterError`,
/// `OrderingError`, `LivenessError`, `CoordinatorError` newtypes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported topic: {0}")]
    UnsupportedTopic(String),
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),
    #[error("bad payload: {0}")]
    BadPayload(String),
    #[error("invalid message type for this operation: {0:?}")]
    InvalidMessageType(MessageType),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport error: {0}")]
    TransportError(String),
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Sparkplug B message type, parsed from the topic's `message_type` token.
///
/// `DDATA` is not named in spec.md §3's enumeration of `Message.messageType`
/// values but is required by the same spec's dispatch table (§4.4) and
/// Ordering Engine contract (§4.2); it is included here as the evident
/// completion of that list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    NBirth,
    NDeath,
    NData,
    DBirth,
    DDeath,
    DData,
    NCmd,
    DCmd,
    State,
}

impl MessageType {
    /// Parse the `message_type` topic token, case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "NBIRTH" => Some(Self::NBirth),
            "NDEATH" => Some(Self::NDeath),
            "NDATA" => Some(Self::NData),
            "DBIRTH" => Some(Self::DBirth),
            "DDEATH" => Some(Self::DDeath),
            "DDATA" => Some(Self::DData),
            "NCMD" => Some(Self::NCmd),
            "DCMD" => Some(Self::DCmd),
            "STATE" => Some(Self::State),
            _ => None,
        }
    }

    /// The topic token for this message type (uppercase, as on the wire).
    pub fn as_topic_token(self) -> &'static str {
        match self {
            Self::NBirth => "NBIRTH",
            Self::NDeath => "NDEATH",
            Self::NData => "NDATA",
            Self::DBirth => "DBIRTH",
            Self::DDeath => "DDEATH",
            Self::DData => "DDATA",
            Self::NCmd => "NCMD",
            Self::DCmd => "DCMD",
            Self::State => "STATE",
        }
    }

    /// True for the four types the Ordering Engine accepts (spec.md §4.2).
    pub fn is_sequenced(self) -> bool {
        matches!(self, Self::NData | Self::DData | Self::DBirth | Self::DDeath)
    }

    /// True for the two types that carry a `bdSeq` metric (alongside DBIRTH/DDEATH).
    pub fn is_edge_lifecycle(self) -> bool {
        matches!(self, Self::NBirth | Self::NDeath)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_topic_token())
    }
}

// ---------------------------------------------------------------------------
// Sparkplug version
// ---------------------------------------------------------------------------

/// Sparkplug protocol version, selected by the MQTT namespace token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SparkplugVersion {
    /// `spBv1.0` <-> Sparkplug B 3.0.0.
    V3_0_0,
}

impl SparkplugVersion {
    pub fn namespace(self) -> &'static str {
        match self {
            Self::V3_0_0 => "spBv1.0",
        }
    }

    /// Case-insensitive match against a namespace topic token.
    pub fn parse_namespace(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("spBv1.0") {
            Some(Self::V3_0_0)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// DataType / MetricValue / Metric
// ---------------------------------------------------------------------------

/// Sparkplug B metric datatypes relevant to bdSeq extraction and command
/// construction. Full numeric/array/DataSet/Template/PropertySet conversion
/// is out of scope (spec.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Boolean,
    String,
}

impl DataType {
    /// The datatypes `extractBdSeq` (spec.md §4.1) accepts as convertible.
    pub fn is_bd_seq_convertible(self) -> bool {
        matches!(
            self,
            Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Int16
                | Self::Int32
                | Self::Int64
        )
    }
}

/// The value half of a [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Int(i64),
    UInt(u64),
    Boolean(bool),
    String(String),
}

/// A single Sparkplug metric within a [`Payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub datatype: DataType,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(name: impl Into<String>, datatype: DataType, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            datatype,
            value,
        }
    }

    /// Build the `"Node Control/Rebirth"` / `"Device Control/Rebirth"` metric
    /// used by the rebirth command convenience forms (spec.md §4.4).
    pub fn rebirth(for_device: bool) -> Self {
        let name = if for_device {
            "Device Control/Rebirth"
        } else {
            "Node Control/Rebirth"
        };
        Self::new(name, DataType::Boolean, MetricValue::Boolean(true))
    }

    /// Build the `"Node Control/Scan Rate"` / `"Device Control/Scan Rate"`
    /// metric used by the scan-rate command convenience forms (spec.md §4.4).
    pub fn scan_rate(for_device: bool, millis: i64) -> Self {
        let name = if for_device {
            "Device Control/Scan Rate"
        } else {
            "Node Control/Scan Rate"
        };
        Self::new(name, DataType::Int64, MetricValue::Int(millis))
    }

    /// Convert this metric's value to an integer if its datatype is
    /// bdSeq-convertible, returning `None` on overflow (spec.md §4.1:
    /// "Overflow in conversion returns 0, not an error" — the caller maps
    /// `None` to `0`).
    fn as_bd_seq_int(&self) -> Option<i64> {
        if !self.datatype.is_bd_seq_convertible() {
            return None;
        }
        match &self.value {
            MetricValue::Int(v) => Some(*v),
            MetricValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A decoded Sparkplug payload (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub timestamp: i64,
    /// `-1` if absent or invalid.
    pub seq: i32,
    pub metrics: Vec<Metric>,
    pub body: Option<Vec<u8>>,
}

impl Payload {
    pub fn new(timestamp: i64, seq: i32) -> Self {
        Self {
            timestamp,
            seq,
            metrics: Vec::new(),
            body: None,
        }
    }

    /// True iff `seq` is a valid uint8 rolling value (spec.md §4.2 "Validity
    /// check").
    pub fn has_valid_seq(&self) -> bool {
        (0..=255).contains(&self.seq)
    }

    /// Linear scan for a metric named `"bdSeq"` (spec.md §4.1
    /// `extractBdSeq`). Returns `0` if absent, of an unsupported datatype,
    /// or if the conversion overflows.
    pub fn extract_bd_seq(&self) -> i64 {
        self.metrics
            .iter()
            .find(|m| m.name == "bdSeq")
            .and_then(Metric::as_bd_seq_int)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// STATE payload (JSON wire format)
// ---------------------------------------------------------------------------

/// The Host's own (and any peer Host's) STATE certificate payload
/// (spec.md §6: `{"online": bool, "timestamp": int64}`, UTF-8 JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub online: bool,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A normalized inbound event (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: SparkplugVersion,
    pub message_type: MessageType,
    pub group_id: String,
    pub edge_node_id: String,
    pub device_id: Option<String>,
    pub payload: Payload,
    pub received_at_millis: i64,
    /// Set by the Ordering Engine at delivery.
    pub is_seq_consecutive: bool,
    /// Set by the Ordering Engine at delivery.
    pub is_cached: bool,
}

impl Message {
    /// The (group_id, edge_node_id) ordering/liveness key for this message.
    pub fn edge_key(&self) -> (String, String) {
        (self.group_id.clone(), self.edge_node_id.clone())
    }
}

// ---------------------------------------------------------------------------
// EndpointStatus
// ---------------------------------------------------------------------------

/// Liveness record for an edge node or device (spec.md §3).
///
/// Per-edge entries use `bd_seq` from NBIRTH/NDEATH; per-device entries
/// always store `bd_seq = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub is_online: bool,
    pub bd_seq: i64,
    pub timestamp_millis: i64,
}

impl EndpointStatus {
    /// The empty placeholder that "loses every comparison" (spec.md §4.3).
    pub const ABSENT: Self = Self {
        is_online: false,
        bd_seq: 0,
        timestamp_millis: i64::MIN,
    };
}

impl Default for EndpointStatus {
    fn default() -> Self {
        Self::ABSENT
    }
}
