//! Host Application configuration loading (spec.md §6).
//!
//! TOML is the sole config source. Two-stage loading: an all-`Option`
//! [`RawConfig`] mirrors the file shape, then [`resolve`] validates
//! required fields and applies defaults — the same split the rest of this
//! workspace's services use for their own config files.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sparkplug_host_protocol::SparkplugVersion;

/// The fully-resolved, typed configuration record (spec.md §6 table).
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub version: SparkplugVersion,
    pub host_application_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub subscriptions: Vec<String>,
    pub enable_message_ordering: bool,
    pub seq_cache_expiration: Duration,
    pub seq_reorder_timeout: Duration,
    pub send_rebirth_when_timeout: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    broker_host: Option<String>,
    broker_port: Option<u16>,
    host_application_id: Option<String>,
    subscriptions: Option<Vec<String>>,
    enable_message_ordering: Option<bool>,
    seq_cache_expiration_minutes: Option<u64>,
    seq_reorder_timeout_ms: Option<u64>,
    send_rebirth_when_timeout: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Load and resolve config from a TOML file on disk.
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_config_from_str(&toml_str)
}

/// Resolve config from a TOML string, applying spec.md §6's defaults.
pub fn load_config_from_str(toml_str: &str) -> Result<HostConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let host_application_id = raw
        .host_application_id
        .ok_or_else(|| ConfigError::MissingField("host_application_id".to_owned()))?;
    let broker_host = raw
        .broker_host
        .ok_or_else(|| ConfigError::MissingField("broker_host".to_owned()))?;

    Ok(HostConfig {
        version: SparkplugVersion::V3_0_0,
        host_application_id,
        broker_host,
        broker_port: raw.broker_port.unwrap_or(1883),
        subscriptions: raw.subscriptions.unwrap_or_default(),
        enable_message_ordering: raw.enable_message_ordering.unwrap_or(false),
        seq_cache_expiration: Duration::from_secs(raw.seq_cache_expiration_minutes.unwrap_or(120) * 60),
        seq_reorder_timeout: Duration::from_millis(raw.seq_reorder_timeout_ms.unwrap_or(10_000)),
        send_rebirth_when_timeout: raw.send_rebirth_when_timeout.unwrap_or(true),
    })
}
