//! Sparkplug B Host Application binary's supporting library: configuration,
//! the MQTT transport seam, and the Host Coordinator that ties it together
//! with `sparkplug-host-core`'s ordering and liveness logic.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod time;
pub mod transport;

pub use codec::JsonPayloadCodec;
pub use config::{load_config, load_config_from_str, ConfigError, HostConfig};
pub use coordinator::{HostCoordinator, HostHandlers};
pub use error::CoordinatorError;
pub use transport::{
    MqttEventSource, MqttPublisher, RumqttcConfig, RumqttcEventSource, RumqttcPublisher, RumqttcTransport, TransportEvent,
};
