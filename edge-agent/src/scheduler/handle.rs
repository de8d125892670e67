//! Cloneable handle for editing a scheduler from inside its actions.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

/// A queued period change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PeriodEdit {
    pub name: String,
    pub period: Duration,
}

/// Handle for requesting period changes.
///
/// Edits are queued and applied by the scheduler once the running action
/// returns, so an action may safely reschedule itself or its siblings.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<PeriodEdit>,
}

impl SchedulerHandle {
    pub(super) fn new(tx: mpsc::UnboundedSender<PeriodEdit>) -> Self {
        Self { tx }
    }

    /// Queue a period change for the named action.
    ///
    /// Returns `false` if the scheduler no longer exists.
    pub fn edit_period(&self, name: impl Into<String>, period: Duration) -> bool {
        let name = name.into();
        match self.tx.send(PeriodEdit {
            name: name.clone(),
            period,
        }) {
            Ok(()) => true,
            Err(_) => {
                warn!(action = %name, "Scheduler dropped, period edit discarded");
                false
            }
        }
    }
}
