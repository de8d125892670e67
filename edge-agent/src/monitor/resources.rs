//! Host resource monitor: CPU, memory and disks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

use super::snapshot::SnapshotCell;
use crate::{Error, Result};
use crate::worker::{MonitorUnit, UnitMode};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    pub capacity: usize,
    /// Global usage, in percent.
    pub load: f32,
    #[serde(rename = "load-1")]
    pub load_1: f64,
    #[serde(rename = "load-5")]
    pub load_5: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cores: Vec<f32>,
}

/// Memory in MiB.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub capacity: u64,
    pub used: u64,
}

/// Disk space in GiB.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub device: String,
    pub capacity: u64,
    pub used: u64,
}

/// One resources sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu: CpuUsage,
    pub ram: MemoryUsage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskUsage>,
}

struct Sampler {
    per_core: bool,
    system: Mutex<System>,
}

impl Sampler {
    /// Blocking: refreshes CPU and memory and stats every mounted disk.
    fn sample(&self) -> ResourceUsage {
        let (cpu, ram) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();

            let load = System::load_average();
            let cores = if self.per_core {
                system.cpus().iter().map(|c| c.cpu_usage()).collect()
            } else {
                Vec::new()
            };
            let cpu = CpuUsage {
                capacity: system.cpus().len(),
                load: system.global_cpu_usage(),
                load_1: load.one,
                load_5: load.five,
                cores,
            };
            let ram = MemoryUsage {
                capacity: system.total_memory() / MIB,
                used: system.used_memory() / MIB,
            };
            (cpu, ram)
        };

        let disks = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| DiskUsage {
                device: d.name().to_string_lossy().into_owned(),
                capacity: d.total_space() / GIB,
                used: d.total_space().saturating_sub(d.available_space()) / GIB,
            })
            .collect();

        ResourceUsage { cpu, ram, disks }
    }
}

/// Inline monitor sampling host resources through `sysinfo`.
pub struct ResourcesMonitor {
    name: String,
    sampler: Arc<Sampler>,
    snapshot: SnapshotCell<ResourceUsage>,
}

impl ResourcesMonitor {
    pub fn new(name: impl Into<String>, per_core: bool) -> Self {
        Self {
            name: name.into(),
            sampler: Arc::new(Sampler {
                per_core,
                system: Mutex::new(System::new_with_specifics(
                    RefreshKind::nothing()
                        .with_cpu(CpuRefreshKind::everything())
                        .with_memory(MemoryRefreshKind::everything()),
                )),
            }),
            snapshot: SnapshotCell::new(),
        }
    }
}

#[async_trait]
impl MonitorUnit for ResourcesMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> UnitMode {
        UnitMode::Inline
    }

    async fn update(&self) -> Result<()> {
        let sampler = self.sampler.clone();
        let usage = tokio::task::spawn_blocking(move || sampler.sample())
            .await
            .map_err(|e| Error::Other(format!("resources sample task failed: {e}")))?;
        self.snapshot.publish(usage);
        Ok(())
    }

    fn is_updated(&self) -> bool {
        self.snapshot.is_published()
    }

    fn populate(&self, report: &mut Map<String, Value>) -> Result<()> {
        if let Some(usage) = self.snapshot.load() {
            report.insert("resources".to_string(), serde_json::to_value(&*usage)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_populates_resources_after_update() {
        let monitor = ResourcesMonitor::new("resources", true);
        let mut report = Map::new();
        monitor.populate(&mut report).unwrap();
        assert!(report.is_empty());

        monitor.update().await.unwrap();
        assert!(monitor.is_updated());

        monitor.populate(&mut report).unwrap();
        let resources = &report["resources"];
        assert!(resources["cpu"]["capacity"].is_u64());
        assert!(resources["ram"]["capacity"].is_u64());
    }

    #[test]
    fn test_usage_wire_shape() {
        let usage = ResourceUsage {
            cpu: CpuUsage {
                capacity: 4,
                load: 12.5,
                load_1: 0.5,
                load_5: 0.25,
                cores: Vec::new(),
            },
            ram: MemoryUsage {
                capacity: 2048,
                used: 512,
            },
            disks: vec![DiskUsage {
                device: "sda1".to_string(),
                capacity: 32,
                used: 8,
            }],
        };

        let value = serde_json::to_value(&usage).unwrap();
        assert_eq!(value["cpu"]["load-1"], 0.5);
        assert!(value["cpu"].get("cores").is_none());
        assert_eq!(value["disks"][0]["device"], "sda1");
    }
}
