//! Raw counter sources.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use sysinfo::Networks;
use tracing::debug;

use super::reconciler::RawCounters;

/// Supplies raw per-interface byte counters.
pub trait CounterSource: Send + Sync {
    /// Current raw readings keyed by interface name.
    ///
    /// Interfaces whose counters cannot be read are left out.
    fn read(&self) -> BTreeMap<String, RawCounters>;
}

/// Reads the OS interface counters through `sysinfo`.
pub struct SysinfoCounters {
    networks: Mutex<Networks>,
}

impl SysinfoCounters {
    pub fn new() -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoCounters").finish_non_exhaustive()
    }
}

impl CounterSource for SysinfoCounters {
    fn read(&self) -> BTreeMap<String, RawCounters> {
        let mut networks = self.networks.lock();
        // Drop interfaces that disappeared and pick up new ones.
        networks.refresh(true);

        let readings: BTreeMap<String, RawCounters> = networks
            .list()
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    RawCounters {
                        tx: data.total_transmitted(),
                        rx: data.total_received(),
                    },
                )
            })
            .collect();
        debug!(interfaces = readings.len(), "Read interface counters");
        readings
    }
}

/// Source serving readings set by the caller.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    readings: Mutex<BTreeMap<String, RawCounters>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw counters returned for `interface`.
    pub fn set(&self, interface: impl Into<String>, tx: u64, rx: u64) {
        self.readings
            .lock()
            .insert(interface.into(), RawCounters { tx, rx });
    }

    pub fn remove(&self, interface: &str) {
        self.readings.lock().remove(interface);
    }
}

impl CounterSource for MemoryCounters {
    fn read(&self) -> BTreeMap<String, RawCounters> {
        self.readings.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_counters_follow_updates() {
        let source = MemoryCounters::new();
        assert!(source.read().is_empty());

        source.set("eth0", 2, 1);
        source.set("wlan0", 40, 30);
        source.set("eth0", 5, 3);
        source.remove("wlan0");

        let readings = source.read();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings["eth0"], RawCounters { tx: 5, rx: 3 });
    }

    #[test]
    fn test_sysinfo_counters_read_named_interfaces() {
        let source = SysinfoCounters::new();
        for (name, _) in source.read() {
            assert!(!name.is_empty());
        }
    }
}
