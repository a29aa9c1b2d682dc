//! Host Coordinator error type (spec.md §4.4, §7).

use sparkplug_host_core::{AdapterError, LivenessError, OrderingError};
use sparkplug_host_protocol::Error as ProtocolError;

/// Errors the Host Coordinator can surface to its caller. `TransportError`
/// is never swallowed (spec.md §7) — every MQTT connect/subscribe/publish
/// failure propagates out of the operation that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Liveness(#[from] LivenessError),
}

impl From<CoordinatorError> for ProtocolError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Transport(s) => ProtocolError::TransportError(s),
            CoordinatorError::InvalidArgument(s) => ProtocolError::InvalidArgument(s),
            CoordinatorError::Adapter(e) => e.into(),
            CoordinatorError::Ordering(e) => e.into(),
            CoordinatorError::Liveness(e) => e.into(),
        }
    }
}
