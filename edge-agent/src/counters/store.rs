//! Durable storage for reconciled counter state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;
use crate::utils::fs::{ensure_parent_dir_sync, read_optional, write_atomic};

/// Persisted state of one counter direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionRecord {
    /// Raw counter value used as the zero point.
    pub baseline: u64,
    /// Total accrued before the current baseline was taken.
    pub carry: u64,
    /// Cumulative value last reported.
    pub total: u64,
}

/// Persisted state of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub tx: DirectionRecord,
    pub rx: DirectionRecord,
}

/// Persisted state keyed by interface name.
pub type PersistedCounters = BTreeMap<String, InterfaceRecord>;

/// Storage for [`PersistedCounters`].
pub trait CounterStore: Send + Sync {
    /// Load the last saved state. `None` when nothing usable was saved.
    fn load(&self) -> Result<Option<PersistedCounters>>;

    /// Replace the saved state.
    fn save(&self, counters: &PersistedCounters) -> Result<()>;
}

/// JSON file store, written atomically.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CounterStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedCounters>> {
        let Some(content) = read_optional(&self.path)? else {
            debug!(path = %self.path.display(), "No persisted counter state");
            return Ok(None);
        };

        match serde_json::from_str(&content) {
            Ok(counters) => Ok(Some(counters)),
            Err(e) => {
                // A truncated or foreign file is ignored, not fatal.
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed counter state");
                Ok(None)
            }
        }
    }

    fn save(&self, counters: &PersistedCounters) -> Result<()> {
        ensure_parent_dir_sync(&self.path)?;
        let json = serde_json::to_vec_pretty(counters)?;
        write_atomic(&self.path, &json)
    }
}

/// In-memory store, for tests and for running without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: Mutex<Option<PersistedCounters>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counters(counters: PersistedCounters) -> Self {
        Self {
            counters: Mutex::new(Some(counters)),
        }
    }

    /// Current saved state.
    pub fn get(&self) -> Option<PersistedCounters> {
        self.counters.lock().clone()
    }
}

impl CounterStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedCounters>> {
        Ok(self.get())
    }

    fn save(&self, counters: &PersistedCounters) -> Result<()> {
        *self.counters.lock() = Some(counters.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> PersistedCounters {
        let mut counters = PersistedCounters::new();
        counters.insert(
            "eth0".to_string(),
            InterfaceRecord {
                tx: DirectionRecord {
                    baseline: 10,
                    carry: 500,
                    total: 520,
                },
                rx: DirectionRecord {
                    baseline: 4,
                    carry: 0,
                    total: 40,
                },
            },
        );
        counters
    }

    #[test]
    fn test_json_store_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_json_store_persists_exactly() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["eth0"]["tx"]["carry"], 500);
        assert_eq!(value["eth0"]["rx"]["total"], 40);
    }

    #[test]
    fn test_json_store_ignores_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&sample()).unwrap();
        assert_eq!(store.get(), Some(sample()));
    }
}
