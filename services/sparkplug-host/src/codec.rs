//! Default [`PayloadCodec`] implementation.
//!
//! The Sparkplug B wire format is Google Protobuf, but no protobuf-codegen
//! crate is otherwise needed in this workspace's dependency stack, and
//! adding one only to satisfy this single seam would be a speculative
//! dependency. JSON is what the rest of this workspace already reaches for
//! to serialize typed records to bytes (`sparkplug-host-protocol`'s own
//! `Payload`/`StatePayload` already derive `serde`), so `JsonPayloadCodec`
//! encodes/decodes through that instead. Swapping in a protobuf codec later
//! means writing another `PayloadCodec` impl, not touching the Coordinator.

use sparkplug_host_core::{AdapterError, PayloadCodec};
use sparkplug_host_protocol::{MessageType, Payload};

/// Encodes/decodes [`Payload`] as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn decode(&self, _message_type: MessageType, bytes: &[u8]) -> Result<Payload, AdapterError> {
        serde_json::from_slice(bytes).map_err(|e| AdapterError::BadPayload(e.to_string()))
    }

    fn encode(&self, _message_type: MessageType, payload: &Payload) -> Result<Vec<u8>, AdapterError> {
        serde_json::to_vec(payload).map_err(|e| AdapterError::BadPayload(e.to_string()))
    }
}
