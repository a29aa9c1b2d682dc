//! Component-level error types.
//!
//! Each component exposes a narrow error enum for the failures it can
//! actually produce, rather than the caller matching on the workspace-wide
//! [`sparkplug_host_protocol::Error`] — the same narrowing this workspace's
//! `DbError`, `SessionError`, and `JournalError` each apply at their own seam.

use sparkplug_host_protocol::{Error as ProtocolError, MessageType};

/// Errors the Topic & Payload Adapter can produce (spec.md §4.1).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unsupported topic: {0}")]
    UnsupportedTopic(String),
    #[error("bad payload: {0}")]
    BadPayload(String),
}

impl From<AdapterError> for ProtocolError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::UnsupportedTopic(s) => ProtocolError::UnsupportedTopic(s),
            AdapterError::BadPayload(s) => ProtocolError::BadPayload(s),
        }
    }
}

/// Errors the Ordering Engine can produce (spec.md §4.2).
#[derive(Debug, thiserror::Error)]
pub enum OrderingError {
    #[error("invalid message type for ordering: {0}")]
    InvalidMessageType(MessageType),
}

impl From<OrderingError> for ProtocolError {
    fn from(e: OrderingError) -> Self {
        match e {
            OrderingError::InvalidMessageType(t) => ProtocolError::InvalidMessageType(t),
        }
    }
}

/// Errors the Liveness Tracker can produce (spec.md §4.3).
#[derive(Debug, thiserror::Error)]
pub enum LivenessError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<LivenessError> for ProtocolError {
    fn from(e: LivenessError) -> Self {
        match e {
            LivenessError::InvalidArgument(s) => ProtocolError::InvalidArgument(s),
        }
    }
}
