//! Cooperative periodic-action scheduler.
//!
//! The agent's main loop asks the [`ActionScheduler`] two questions each
//! cycle: which action runs now, and how long it may idle afterwards.
//!
//! # Model
//!
//! - Each [`ScheduledAction`] carries its own period and countdown
//! - `next()` advances every countdown by the elapsed wall time, runs the
//!   most overdue action and resets its countdown to its period
//! - Actions run one at a time on the caller's task; failures are logged
//!   and never reach the loop
//! - Code running inside an action edits periods through the
//!   [`SchedulerHandle`] found in its [`ActionContext`]

mod action;
mod handle;
mod service;

pub use action::{ActionContext, ActionFuture, ActionView, ScheduledAction};
pub use handle::SchedulerHandle;
pub use service::{ActionScheduler, IDLE_SLEEP, PeriodPolicy};
pub(crate) use service::panic_message;
