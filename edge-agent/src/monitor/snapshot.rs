//! Atomically published monitor data.

use std::sync::Arc;

use parking_lot::RwLock;

/// Holds the latest complete snapshot produced by a monitor.
///
/// A monitor builds its record off to the side and swaps it in with
/// [`SnapshotCell::publish`]; readers get an `Arc` to a finished record and
/// never see a partial update.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Option<Arc<T>>>,
}

impl<T> SnapshotCell<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Replace the current snapshot.
    pub fn publish(&self, value: T) {
        *self.current.write() = Some(Arc::new(value));
    }

    /// The latest snapshot, if one was published.
    pub fn load(&self) -> Option<Arc<T>> {
        self.current.read().clone()
    }

    pub fn is_published(&self) -> bool {
        self.current.read().is_some()
    }
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
