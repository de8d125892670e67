//! Action scheduler service.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::action::{ActionContext, ActionView, ScheduledAction};
use super::handle::{PeriodEdit, SchedulerHandle};
use crate::{Error, Result};

/// Idle time reported when no action is registered.
pub const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// How `edit_period` treats the countdown of an existing action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PeriodPolicy {
    /// Keep the countdown, but never let it exceed the new period.
    #[default]
    Clamp,
    /// Scale the countdown by `new_period / old_period`.
    Rescale,
}

/// Cooperative scheduler for the agent's top-level periodic actions.
///
/// Owned and driven by the single main loop task.
pub struct ActionScheduler {
    actions: Vec<ScheduledAction>,
    policy: PeriodPolicy,
    last_tick: Instant,
    edits_tx: mpsc::UnboundedSender<PeriodEdit>,
    edits_rx: mpsc::UnboundedReceiver<PeriodEdit>,
}

impl ActionScheduler {
    /// Create an empty scheduler using the clamp policy.
    pub fn new() -> Self {
        Self::with_policy(PeriodPolicy::default())
    }

    /// Create an empty scheduler with an explicit period edit policy.
    pub fn with_policy(policy: PeriodPolicy) -> Self {
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        Self {
            actions: Vec::new(),
            policy,
            last_tick: Instant::now(),
            edits_tx,
            edits_rx,
        }
    }

    /// Handle for queuing period edits from outside the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.edits_tx.clone())
    }

    pub fn policy(&self) -> PeriodPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register a periodic action.
    pub fn add(&mut self, action: ScheduledAction) -> Result<()> {
        if action.period.is_zero() {
            return Err(Error::validation(format!(
                "Action {} must have a positive period",
                action.name
            )));
        }
        if self.actions.iter().any(|a| a.name == action.name) {
            return Err(Error::DuplicateName(action.name));
        }

        info!(
            action = %action.name,
            period_secs = action.period.as_secs_f64(),
            first_run_in = action.remaining,
            "Registered periodic action"
        );
        self.actions.push(action);
        Ok(())
    }

    /// Change the period of an existing action.
    ///
    /// Unknown names are logged and ignored. Returns whether an action was
    /// updated.
    pub fn edit_period(&mut self, name: &str, period: Duration) -> bool {
        if period.is_zero() {
            warn!(action = %name, "Ignoring zero period edit");
            return false;
        }
        let policy = self.policy;
        let Some(action) = self.actions.iter_mut().find(|a| a.name == name) else {
            warn!(action = %name, "Cannot edit period of unknown action");
            return false;
        };

        let old = action.period.as_secs_f64();
        let new = period.as_secs_f64();
        match policy {
            PeriodPolicy::Clamp => {
                action.remaining = action.remaining.min(new);
            }
            PeriodPolicy::Rescale => {
                if action.remaining > 0.0 {
                    action.remaining *= new / old;
                }
            }
        }
        action.period = period;

        debug!(
            action = %name,
            old_period_secs = old,
            new_period_secs = new,
            remaining = action.remaining,
            %policy,
            "Action period updated"
        );
        true
    }

    /// Run the most overdue action.
    ///
    /// Exactly one action runs per call. Returns its name, or `None` when
    /// nothing is registered.
    pub async fn next(&mut self) -> Option<String> {
        self.apply_pending_edits();
        self.advance();

        let index = self
            .actions
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.remaining.total_cmp(&b.remaining))
            .map(|(i, _)| i)?;

        let ctx = ActionContext {
            name: self.actions[index].name.clone(),
            scheduler: self.handle(),
        };
        let name = ctx.name.clone();
        let future = (self.actions[index].action)(ctx);

        debug!(action = %name, "Running action");
        let started = Instant::now();
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(action = %name, elapsed = ?started.elapsed(), "Action completed");
            }
            Ok(Err(e)) => {
                error!(action = %name, error = %e, "Action failed");
            }
            Err(panic) => {
                error!(action = %name, panic = %panic_message(&*panic), "Action panicked");
            }
        }

        let action = &mut self.actions[index];
        action.remaining = action.period.as_secs_f64();

        self.apply_pending_edits();
        Some(name)
    }

    /// Longest time the caller may idle before an action becomes due.
    pub fn sleep_time(&self) -> Duration {
        self.actions
            .iter()
            .map(|a| a.remaining)
            .min_by(f64::total_cmp)
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
            .unwrap_or(IDLE_SLEEP)
    }

    /// Current schedule of every action, in registration order.
    pub fn actions(&self) -> Vec<ActionView> {
        self.actions.iter().map(ScheduledAction::view).collect()
    }

    /// Look up one action's schedule.
    pub fn action(&self, name: &str) -> Option<ActionView> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .map(ScheduledAction::view)
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        if elapsed > 0.0 {
            for action in &mut self.actions {
                action.remaining -= elapsed;
            }
        }
    }

    fn apply_pending_edits(&mut self) {
        while let Ok(edit) = self.edits_rx.try_recv() {
            self.edit_period(&edit.name, edit.period);
        }
    }
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
