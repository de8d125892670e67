//! Static host information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sysinfo::System;

use super::snapshot::SnapshotCell;
use crate::{Error, Result};
use crate::worker::{MonitorUnit, UnitMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_boot: Option<String>,
}

impl SystemInfo {
    fn collect() -> Self {
        let last_boot = DateTime::<Utc>::from_timestamp(System::boot_time() as i64, 0)
            .map(|at| at.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        Self {
            hostname: System::host_name(),
            operating_system: System::long_os_version(),
            architecture: std::env::consts::ARCH.to_string(),
            last_boot,
        }
    }
}

/// Inline monitor reporting hostname, OS, architecture and boot time.
pub struct SystemMonitor {
    name: String,
    snapshot: SnapshotCell<SystemInfo>,
}

impl SystemMonitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snapshot: SnapshotCell::new(),
        }
    }
}

#[async_trait]
impl MonitorUnit for SystemMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> UnitMode {
        UnitMode::Inline
    }

    async fn update(&self) -> Result<()> {
        let info = tokio::task::spawn_blocking(SystemInfo::collect)
            .await
            .map_err(|e| Error::Other(format!("system info task failed: {e}")))?;
        self.snapshot.publish(info);
        Ok(())
    }

    fn is_updated(&self) -> bool {
        self.snapshot.is_published()
    }

    fn populate(&self, report: &mut Map<String, Value>) -> Result<()> {
        let Some(info) = self.snapshot.load() else {
            return Ok(());
        };
        if let Value::Object(fields) = serde_json::to_value(&*info)? {
            report.extend(fields);
        }
        Ok(())
    }
}
