//! Network traffic monitor.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::snapshot::SnapshotCell;
use crate::counters::{CounterReconciler, CounterSource, CounterStore, InterfaceTraffic};
use crate::worker::{MonitorUnit, UnitMode};
use crate::{Error, Result};

/// Latest reconciled traffic of every interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub interfaces: Vec<InterfaceTraffic>,
}

struct NetworkState {
    source: Arc<dyn CounterSource>,
    store: Arc<dyn CounterStore>,
    reconciler: Mutex<CounterReconciler>,
    snapshot: SnapshotCell<NetworkSnapshot>,
}

impl NetworkState {
    fn poll(&self) -> Result<()> {
        let readings = self.source.read();
        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted traffic counters");
                None
            }
        };

        let (interfaces, records) = {
            let mut reconciler = self.reconciler.lock();
            let interfaces = reconciler.reconcile(&readings, persisted.as_ref());
            (interfaces, reconciler.records())
        };
        debug!(interfaces = interfaces.len(), "Traffic counters reconciled");

        self.snapshot.publish(NetworkSnapshot { interfaces });
        self.store.save(&records)
    }
}

/// Threaded monitor reporting cumulative interface traffic.
///
/// Each poll reads raw counters, reconciles them against the persisted
/// state and saves the result, so a recreated monitor resumes where the
/// previous instance stopped.
pub struct NetworkMonitor {
    name: String,
    state: Arc<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn CounterSource>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(NetworkState {
                source,
                store,
                reconciler: Mutex::new(CounterReconciler::new()),
                snapshot: SnapshotCell::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<NetworkSnapshot>> {
        self.state.snapshot.load()
    }
}

#[async_trait]
impl MonitorUnit for NetworkMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> UnitMode {
        UnitMode::Threaded
    }

    async fn update(&self) -> Result<()> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || state.poll())
            .await
            .map_err(|e| Error::Other(format!("network poll task failed: {e}")))?
    }

    fn is_updated(&self) -> bool {
        self.state.snapshot.is_published()
    }

    fn populate(&self, report: &mut Map<String, Value>) -> Result<()> {
        let Some(snapshot) = self.state.snapshot.load() else {
            return Ok(());
        };
        if snapshot.interfaces.is_empty() {
            return Ok(());
        }
        let interfaces = serde_json::to_value(&snapshot.interfaces)?;
        report.insert("network".to_string(), json!({ "interfaces": interfaces }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{MemoryStore, RawCounters};
    use std::collections::BTreeMap;

    struct FixedCounters(Mutex<Vec<BTreeMap<String, RawCounters>>>);

    impl FixedCounters {
        fn new(polls: Vec<(u64, u64)>) -> Self {
            let polls = polls
                .into_iter()
                .rev()
                .map(|(tx, rx)| BTreeMap::from([("eth0".to_string(), RawCounters { tx, rx })]))
                .collect();
            Self(Mutex::new(polls))
        }
    }

    impl CounterSource for FixedCounters {
        fn read(&self) -> BTreeMap<String, RawCounters> {
            self.0.lock().pop().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_poll_publishes_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let monitor = NetworkMonitor::new(
            "network",
            Arc::new(FixedCounters::new(vec![(2, 1), (10, 9)])),
            store.clone(),
        );
        assert!(!monitor.is_updated());

        monitor.update().await.unwrap();
        monitor.update().await.unwrap();

        assert!(monitor.is_updated());
        let snapshot = monitor.snapshot().unwrap();
        assert_eq!(snapshot.interfaces[0].tx_bytes, 8);
        assert_eq!(snapshot.interfaces[0].rx_bytes, 8);

        let saved = store.get().unwrap();
        assert_eq!(saved["eth0"].tx.total, 8);
        assert_eq!(saved["eth0"].tx.baseline, 2);

        let mut report = Map::new();
        monitor.populate(&mut report).unwrap();
        assert_eq!(report["network"]["interfaces"][0]["bytes-transmitted"], 8);
    }

    #[tokio::test]
    async fn test_recreated_monitor_resumes_from_store() {
        let store = Arc::new(MemoryStore::new());
        let first = NetworkMonitor::new(
            "network",
            Arc::new(FixedCounters::new(vec![(100, 100), (150, 120)])),
            store.clone(),
        );
        first.update().await.unwrap();
        first.update().await.unwrap();

        let second = NetworkMonitor::new(
            "network",
            Arc::new(FixedCounters::new(vec![(170, 130)])),
            store.clone(),
        );
        second.update().await.unwrap();

        let snapshot = second.snapshot().unwrap();
        assert_eq!(snapshot.interfaces[0].tx_bytes, 70);
        assert_eq!(snapshot.interfaces[0].rx_bytes, 30);
    }

    #[tokio::test]
    async fn test_no_interfaces_contributes_nothing() {
        let monitor = NetworkMonitor::new(
            "network",
            Arc::new(FixedCounters::new(vec![])),
            Arc::new(MemoryStore::new()),
        );
        monitor.update().await.unwrap();

        let mut report = Map::new();
        monitor.populate(&mut report).unwrap();
        assert!(report.is_empty());
    }
}
