//! Scheduled action definitions.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

use super::handle::SchedulerHandle;
use crate::Result;

/// Future returned by an action invocation.
pub type ActionFuture = BoxFuture<'static, Result<()>>;

type ActionFn = Box<dyn FnMut(ActionContext) -> ActionFuture + Send>;

/// Context handed to an action each time it runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Name of the running action.
    pub name: String,
    /// Handle for editing action periods from inside the action.
    pub scheduler: SchedulerHandle,
}

/// A named, periodically invoked callback.
///
/// Arguments the action needs are captured by the closure.
pub struct ScheduledAction {
    pub(super) name: String,
    pub(super) period: Duration,
    /// Seconds until due; negative once overdue.
    pub(super) remaining: f64,
    pub(super) action: ActionFn,
}

impl ScheduledAction {
    /// Create an action that is due on the first cycle.
    pub fn new<F, Fut>(name: impl Into<String>, period: Duration, mut action: F) -> Self
    where
        F: FnMut(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            remaining: 0.0,
            action: Box::new(move |ctx| Box::pin(action(ctx))),
        }
    }

    /// Delay the first run by `remaining` instead of running immediately.
    ///
    /// Used to stagger actions at start-up so they do not all fire on the
    /// same cycle.
    pub fn with_remaining(mut self, remaining: Duration) -> Self {
        self.remaining = remaining.as_secs_f64();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Seconds until the action is due (negative when overdue).
    pub fn remaining_secs(&self) -> f64 {
        self.remaining
    }

    pub(super) fn view(&self) -> ActionView {
        ActionView {
            name: self.name.clone(),
            period: self.period,
            remaining_secs: self.remaining,
        }
    }
}

impl std::fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of an action's schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionView {
    pub name: String,
    pub period: Duration,
    pub remaining_secs: f64,
}
