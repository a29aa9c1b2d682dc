//! Core logic for the Sparkplug B Host Application: topic/payload
//! adaptation, sequence ordering, and liveness tracking.
//!
//! This crate has no MQTT transport of its own — it is driven by whatever
//! delivers [`adapter::RawDelivery`]s to it. `sparkplug-host` is the
//! binary that wires a real transport and a real protobuf codec around it.

pub mod adapter;
pub mod error;
pub mod liveness;
pub mod ordering;

pub use adapter::{PayloadCodec, RawDelivery};
pub use error::{AdapterError, LivenessError, OrderingError};
pub use liveness::LivenessTracker;
pub use ordering::{circ_cmp, FlushCallback, OrderingEngine, OrderingEngineConfig, RebirthCallback};
