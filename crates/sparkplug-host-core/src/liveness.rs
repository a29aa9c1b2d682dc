//! Liveness Tracker (spec.md §4.3).
//!
//! Maintains online/offline status for edge nodes and their child devices.
//! A device is reported online only when both its own record and its
//! parent edge node's record agree (spec.md I4) — an edge node going
//! offline cascades to every device registered under it.

use std::collections::{HashMap, HashSet};

use sparkplug_host_protocol::EndpointStatus;
use tokio::sync::RwLock;

use crate::error::LivenessError;

type EdgeKey = (String, String);
type DeviceKey = (String, String, String);

fn require_non_empty(label: &str, value: &str) -> Result<(), LivenessError> {
    if value.is_empty() {
        return Err(LivenessError::InvalidArgument(format!("{label} must not be empty")));
    }
    Ok(())
}

/// Tracks online/offline state for edge nodes and devices (spec.md §4.3).
pub struct LivenessTracker {
    edges: RwLock<HashMap<EdgeKey, EndpointStatus>>,
    devices: RwLock<HashMap<DeviceKey, EndpointStatus>>,
    /// Child index so an edge transition can invalidate its devices without
    /// a full scan (spec.md §4.3 edge-node update rule, cascade clause).
    devices_by_edge: RwLock<HashMap<EdgeKey, HashSet<String>>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            devices_by_edge: RwLock::new(HashMap::new()),
        }
    }

    /// Apply an NBIRTH/NDEATH transition for an edge node (spec.md §4.3
    /// `updateEdgeNode`).
    ///
    /// Acceptance rule: going online always requires a strictly newer
    /// timestamp. Going offline requires a strictly newer timestamp too,
    /// unless the edge node is currently online, in which case a matching
    /// `bd_seq` also suffices (the death certificate for the birth that is
    /// currently live) — and acceptance of that transition additionally
    /// invalidates every device registered under this edge node.
    pub async fn update_edge_node(
        &self,
        group_id: &str,
        edge_node_id: &str,
        is_online: bool,
        bd_seq: i64,
        timestamp_millis: i64,
    ) -> Result<(), LivenessError> {
        require_non_empty("group_id", group_id)?;
        require_non_empty("edge_node_id", edge_node_id)?;

        let key = (group_id.to_owned(), edge_node_id.to_owned());
        let mut edges = self.edges.write().await;
        let current = edges.get(&key).copied().unwrap_or_default();

        let accepted = if is_online {
            timestamp_millis > current.timestamp_millis
        } else if !current.is_online {
            timestamp_millis > current.timestamp_millis
        } else {
            bd_seq == current.bd_seq || timestamp_millis >= current.timestamp_millis
        };
        if !accepted {
            return Ok(());
        }

        let cascades = !is_online && current.is_online;
        edges.insert(
            key.clone(),
            EndpointStatus {
                is_online,
                bd_seq,
                timestamp_millis,
            },
        );
        drop(edges);

        if cascades {
            self.cascade_edge_offline(&key).await;
        }
        Ok(())
    }

    async fn cascade_edge_offline(&self, edge_key: &EdgeKey) {
        let children = {
            let index = self.devices_by_edge.read().await;
            index.get(edge_key).cloned().unwrap_or_default()
        };
        if children.is_empty() {
            return;
        }
        let mut devices = self.devices.write().await;
        for device_id in children {
            let device_key = (edge_key.0.clone(), edge_key.1.clone(), device_id);
            if let Some(status) = devices.get_mut(&device_key) {
                status.is_online = false;
            }
        }
    }

    /// Apply a DBIRTH/DDEATH transition for a device (spec.md §4.3
    /// `updateDevice`). Devices carry no `bd_seq` of their own (spec.md §3);
    /// acceptance requires a strictly newer timestamp than the stored record.
    pub async fn update_device(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: &str,
        is_online: bool,
        timestamp_millis: i64,
    ) -> Result<(), LivenessError> {
        require_non_empty("group_id", group_id)?;
        require_non_empty("edge_node_id", edge_node_id)?;
        require_non_empty("device_id", device_id)?;

        let edge_key = (group_id.to_owned(), edge_node_id.to_owned());
        let device_key = (group_id.to_owned(), edge_node_id.to_owned(), device_id.to_owned());

        let mut devices = self.devices.write().await;
        let current = devices.get(&device_key).copied().unwrap_or_default();
        if timestamp_millis <= current.timestamp_millis {
            return Ok(());
        }
        devices.insert(
            device_key,
            EndpointStatus {
                is_online,
                bd_seq: 0,
                timestamp_millis,
            },
        );
        drop(devices);

        let mut index = self.devices_by_edge.write().await;
        index
            .entry(edge_key)
            .or_insert_with(HashSet::new)
            .insert(device_id.to_owned());
        Ok(())
    }

    /// Online iff both an edge node's own record, and (for a device query)
    /// its device record, report online, with the edge node's timestamp no
    /// later than the device's (spec.md I4).
    pub async fn is_online(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: Option<&str>,
    ) -> bool {
        let edge_key = (group_id.to_owned(), edge_node_id.to_owned());
        let edge = self.edges.read().await.get(&edge_key).copied().unwrap_or_default();
        if !edge.is_online {
            return false;
        }
        let Some(device_id) = device_id else {
            return true;
        };
        let device_key = (group_id.to_owned(), edge_node_id.to_owned(), device_id.to_owned());
        let device = self.devices.read().await.get(&device_key).copied().unwrap_or_default();
        device.is_online && edge.timestamp_millis <= device.timestamp_millis
    }

    /// Discard all liveness state (spec.md §4.3 `clearAll`; used on Host
    /// disconnect/shutdown per spec.md §4.4).
    pub async fn clear_all(&self) {
        self.edges.write().await.clear();
        self.devices.write().await.clear();
        self.devices_by_edge.write().await.clear();
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}
