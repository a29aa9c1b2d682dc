// sparkplug-host: a Sparkplug B Host Application. Connects to an MQTT
// broker, tracks edge node/device liveness and message ordering, and logs
// what it sees. Commands (rebirth requests, scan-rate changes) are driven
// through `HostCoordinator` by embedding this crate as a library; this
// binary on its own is an observability-only Host Application.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Arg, Command};
use sparkplug_host_core::adapter::RawDelivery;
use sparkplug_host_core::{LivenessTracker, OrderingEngine, OrderingEngineConfig};
use sparkplug_host_protocol::topic::{self, TopicKind};
use sparkplug_host_protocol::{Message, StatePayload};
use sparkplug_host::{config, time, CoordinatorError, HostCoordinator, HostHandlers, RumqttcConfig, RumqttcTransport};
use tokio::sync::watch;
use tracing::{error, info, warn};

fn validate_config_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("'{value}' is not a file"))
    }
}

/// Logs every event the dispatch table produces. A real Host Application
/// embeds this crate as a library and supplies its own [`HostHandlers`]
/// (forwarding into a historian, a rules engine, whatever the deployment
/// needs); this one just observes.
struct LoggingHandlers;

#[async_trait]
impl HostHandlers for LoggingHandlers {
    async fn edge_node_birth(&self, group_id: &str, edge_node_id: &str, timestamp_millis: i64) {
        info!(%group_id, %edge_node_id, timestamp_millis, "edge node online");
    }

    async fn edge_node_death(&self, group_id: &str, edge_node_id: &str, timestamp_millis: i64) {
        info!(%group_id, %edge_node_id, timestamp_millis, "edge node offline");
    }

    async fn node_data(&self, message: Message) {
        info!(
            group_id = %message.group_id,
            edge_node_id = %message.edge_node_id,
            seq = message.payload.seq,
            consecutive = message.is_seq_consecutive,
            metrics = message.payload.metrics.len(),
            "NDATA"
        );
    }

    async fn device_birth(&self, message: Message) {
        info!(
            group_id = %message.group_id,
            edge_node_id = %message.edge_node_id,
            device_id = ?message.device_id,
            "device online"
        );
    }

    async fn device_death(&self, message: Message) {
        info!(
            group_id = %message.group_id,
            edge_node_id = %message.edge_node_id,
            device_id = ?message.device_id,
            "device offline"
        );
    }

    async fn device_data(&self, message: Message) {
        info!(
            group_id = %message.group_id,
            edge_node_id = %message.edge_node_id,
            device_id = ?message.device_id,
            seq = message.payload.seq,
            consecutive = message.is_seq_consecutive,
            metrics = message.payload.metrics.len(),
            "DDATA"
        );
    }

    async fn host_state(&self, host_id: &str, online: bool, timestamp_millis: i64) {
        info!(%host_id, online, timestamp_millis, "peer host STATE");
    }

    async fn unsupported(&self, delivery: RawDelivery, error: CoordinatorError) {
        warn!(topic = %delivery.topic, %error, "dropped undecodable delivery");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "sparkplug-host starting");

    let matches = Command::new("Sparkplug Host Application")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A Sparkplug B Host Application: MQTT lifecycle, ordering, and liveness tracking")
        .arg(
            Arg::new("config")
                .help("Path to the TOML config file")
                .short('c')
                .long("config")
                .value_parser(validate_config_path)
                .required(true),
        )
        .get_matches();

    let config_path = matches.get_one::<PathBuf>("config").expect("config is required");
    let host_config = config::load_config(config_path).unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load config: {e}");
        std::process::exit(1);
    });

    let state_topic = topic::encode_topic(
        host_config.version,
        &TopicKind::State {
            host_id: host_config.host_application_id.clone(),
        },
    )
    .unwrap_or_else(|e| {
        eprintln!("FATAL: invalid host_application_id: {e}");
        std::process::exit(1);
    });
    let last_will_payload = serde_json::to_vec(&StatePayload {
        online: false,
        timestamp: time::now_millis(),
    })
    .expect("StatePayload always serializes");

    let (publisher, event_source) = RumqttcTransport::connect(RumqttcConfig {
        client_id: format!("sparkplug-host-{}", host_config.host_application_id),
        host: host_config.broker_host.clone(),
        port: host_config.broker_port,
        keep_alive_secs: 30,
        last_will_topic: state_topic,
        last_will_payload,
    });

    let ordering = OrderingEngine::new(
        OrderingEngineConfig {
            reorder_timeout: host_config.seq_reorder_timeout,
            cache_expiration: Some(host_config.seq_cache_expiration),
            send_rebirth_when_timeout: host_config.send_rebirth_when_timeout,
        },
        Arc::new(|batch: Vec<Message>| {
            for message in batch {
                info!(
                    group_id = %message.group_id,
                    edge_node_id = %message.edge_node_id,
                    seq = message.payload.seq,
                    "reorder timeout released buffered message"
                );
            }
        }),
        Arc::new(|group_id: String, edge_node_id: String| {
            warn!(%group_id, %edge_node_id, "requesting rebirth after reorder timeout");
        }),
    );

    let coordinator = Arc::new(HostCoordinator::new(
        host_config,
        Arc::new(publisher),
        Box::new(event_source),
        Arc::new(sparkplug_host::JsonPayloadCodec),
        ordering,
        LivenessTracker::new(),
        Arc::new(LoggingHandlers),
    ));

    if let Err(e) = coordinator.start().await {
        eprintln!("FATAL: failed to start: {e}");
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_coordinator = Arc::clone(&coordinator);
    let dispatch = tokio::spawn(async move {
        if let Err(e) = run_coordinator.run(shutdown_rx).await {
            error!(error = %e, "dispatch loop exited with an error");
        }
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = dispatch.await;

    if let Err(e) = coordinator.shutdown().await {
        error!(error = %e, "error during shutdown");
    }
    info!("sparkplug-host stopped");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
