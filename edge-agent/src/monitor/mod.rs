//! Telemetry monitors.
//!
//! Every monitor is a [`MonitorUnit`] built from the [`MonitorKind`] table.
//! The telemetry aggregator registers one worker per kind that is not
//! excluded by configuration.

mod network;
mod resources;
mod snapshot;
mod system;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use strum::IntoEnumIterator;
use tracing::info;

pub use network::{NetworkMonitor, NetworkSnapshot};
pub use resources::{CpuUsage, DiskUsage, MemoryUsage, ResourceUsage, ResourcesMonitor};
pub use snapshot::SnapshotCell;
pub use system::{SystemInfo, SystemMonitor};

use crate::config::AgentConfig;
use crate::counters::{CounterSource, JsonFileStore, SysinfoCounters};
use crate::worker::{MonitorUnit, UnitFactory, UnitMode, WorkerRegistry, unit_factory};

/// Known monitors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum MonitorKind {
    Network,
    Resources,
    System,
}

impl MonitorKind {
    pub fn mode(self) -> UnitMode {
        match self {
            MonitorKind::Network => UnitMode::Threaded,
            MonitorKind::Resources | MonitorKind::System => UnitMode::Inline,
        }
    }

    /// How often the monitor refreshes on its own. Inline monitors are
    /// driven by the aggregator instead.
    pub fn period(self) -> Duration {
        match self {
            MonitorKind::Network => Duration::from_secs(15),
            MonitorKind::Resources => Duration::from_secs(60),
            MonitorKind::System => Duration::from_secs(60),
        }
    }

    /// Factory producing fresh instances of this monitor.
    pub fn factory(self, settings: &MonitorSettings) -> UnitFactory {
        let name = self.to_string();
        match self {
            MonitorKind::Network => {
                let source = settings.counter_source.clone();
                let state_file = settings.network_state_file.clone();
                unit_factory(move || {
                    Ok(Arc::new(NetworkMonitor::new(
                        name.clone(),
                        source.clone(),
                        Arc::new(JsonFileStore::new(state_file.clone())),
                    )) as Arc<dyn MonitorUnit>)
                })
            }
            MonitorKind::Resources => {
                let per_core = settings.per_core_cpu;
                unit_factory(move || {
                    Ok(Arc::new(ResourcesMonitor::new(name.clone(), per_core)) as Arc<dyn MonitorUnit>)
                })
            }
            MonitorKind::System => unit_factory(move || {
                Ok(Arc::new(SystemMonitor::new(name.clone())) as Arc<dyn MonitorUnit>)
            }),
        }
    }
}

/// Sources, paths and feature flags handed to monitors.
#[derive(Clone)]
pub struct MonitorSettings {
    /// Raw interface counters, shared by every network monitor instance.
    pub counter_source: Arc<dyn CounterSource>,
    pub network_state_file: PathBuf,
    pub per_core_cpu: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            counter_source: Arc::new(SysinfoCounters::new()),
            network_state_file: config.network_state_file.clone(),
            per_core_cpu: config.per_core_cpu,
        }
    }
}

/// Register every monitor not named in `exclusions`.
///
/// Returns the names that were registered.
pub fn register_monitors(
    registry: &mut WorkerRegistry,
    settings: &MonitorSettings,
    exclusions: &[String],
) -> Vec<String> {
    let mut registered = Vec::new();
    for kind in MonitorKind::iter() {
        let name = kind.to_string();
        if exclusions.iter().any(|e| e == &name) {
            info!("Monitor \"{}\" excluded", name);
            continue;
        }
        if registry.register(name.clone(), kind.period(), kind.factory(settings), Vec::new()) {
            registered.push(name);
        }
    }
    registered
}
