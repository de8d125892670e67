//! Per-worker failure accounting.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Number of failure kinds kept in a worker's history.
pub const EXCEPTION_HISTORY_LIMIT: usize = 32;

/// Failure and timing record of one worker.
///
/// Keyed by worker name in the registry and shared with the worker's task,
/// so it outlives any single unit instance.
#[derive(Debug, Clone, Default)]
pub struct WorkerAccounting {
    error_count: u64,
    exceptions: VecDeque<String>,
    last_process_duration: Option<Duration>,
    last_run: Option<Instant>,
    restarts: u64,
}

impl WorkerAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful update.
    pub fn record_success(&mut self, duration: Duration) {
        self.last_process_duration = Some(duration);
        self.last_run = Some(Instant::now());
    }

    /// Record a failed update of the given kind.
    pub fn record_failure(&mut self, kind: impl Into<String>, duration: Option<Duration>) {
        self.error_count += 1;
        if self.exceptions.len() == EXCEPTION_HISTORY_LIMIT {
            self.exceptions.pop_front();
        }
        self.exceptions.push_back(kind.into());
        if let Some(duration) = duration {
            self.last_process_duration = Some(duration);
        }
        self.last_run = Some(Instant::now());
    }

    pub(crate) fn record_restart(&mut self) {
        self.restarts += 1;
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Failure kinds in the order observed, oldest first.
    pub fn exceptions(&self) -> impl Iterator<Item = &str> {
        self.exceptions.iter().map(String::as_str)
    }

    /// Distinct failure kinds in the retained history.
    pub fn distinct_exceptions(&self) -> BTreeSet<String> {
        self.exceptions.iter().cloned().collect()
    }

    pub fn last_process_duration(&self) -> Option<Duration> {
        self.last_process_duration
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    /// How many times the unit was rebuilt after its task died.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}
