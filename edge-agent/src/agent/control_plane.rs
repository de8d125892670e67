//! Boundary to the fleet-management control plane.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::telemetry::TelemetryPayload;

/// State prefix the control plane uses for nodes being retired.
pub const DECOMMISSION_PREFIX: &str = "DECOMMISSION";

/// The node document as served by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeResource {
    pub id: String,
    pub state: String,
    /// Changes whenever the document is edited.
    #[serde(default)]
    pub updated: Option<String>,
    /// Telemetry period requested for this node (seconds).
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    /// Heartbeat period requested for this node (seconds).
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default)]
    pub vpn_server_id: Option<String>,
}

impl NodeResource {
    pub fn is_decommissioned(&self) -> bool {
        self.state.starts_with(DECOMMISSION_PREFIX)
    }
}

/// Transport to the control plane.
///
/// Implementations own serialization, authentication and retries.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn heartbeat(&self) -> Result<()>;

    async fn send_telemetry(&self, payload: &TelemetryPayload) -> Result<()>;

    async fn fetch_node(&self) -> Result<NodeResource>;
}

/// Control plane stand-in used when no transport is configured.
///
/// Logs every call and serves a locally held node document.
#[derive(Debug)]
pub struct OfflineControlPlane {
    node: RwLock<NodeResource>,
    heartbeats: AtomicU64,
    telemetry: AtomicU64,
    last_telemetry: RwLock<Option<TelemetryPayload>>,
}

impl OfflineControlPlane {
    pub fn new(node: NodeResource) -> Self {
        Self {
            node: RwLock::new(node),
            heartbeats: AtomicU64::new(0),
            telemetry: AtomicU64::new(0),
            last_telemetry: RwLock::new(None),
        }
    }

    /// A commissioned node with no interval overrides.
    pub fn commissioned(id: impl Into<String>) -> Self {
        Self::new(NodeResource {
            id: id.into(),
            state: "COMMISSIONED".to_string(),
            ..NodeResource::default()
        })
    }

    /// Replace the served node document.
    pub fn set_node(&self, node: NodeResource) {
        *self.node.write() = node;
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn telemetry_count(&self) -> u64 {
        self.telemetry.load(Ordering::Relaxed)
    }

    pub fn last_telemetry(&self) -> Option<TelemetryPayload> {
        self.last_telemetry.read().clone()
    }
}

#[async_trait]
impl ControlPlane for OfflineControlPlane {
    async fn heartbeat(&self) -> Result<()> {
        let count = self.heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(count, "Heartbeat (offline)");
        Ok(())
    }

    async fn send_telemetry(&self, payload: &TelemetryPayload) -> Result<()> {
        let count = self.telemetry.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            count,
            fields = payload.len(),
            current_time = payload.current_time().unwrap_or_default(),
            "Telemetry delivered (offline)"
        );
        *self.last_telemetry.write() = Some(payload.clone());
        Ok(())
    }

    async fn fetch_node(&self) -> Result<NodeResource> {
        Ok(self.node.read().clone())
    }
}
