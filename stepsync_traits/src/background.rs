//! Host background-execution contract.
//!
//! A host invokes registered tasks periodically or at its own discretion and
//! grants each invocation a time budget. The task must signal its
//! [`Completion`] before the budget runs out, or the host may kill the
//! process and throttle future invocations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier handed out by [`BackgroundHost::register`].
pub type TaskId = u64;

/// Result reported to the host when a background invocation finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// New data was fetched or produced.
    NewData,
    /// The task ran but had nothing new.
    NoData,
    /// The task failed or never signalled.
    Failed,
}

type Signal = Box<dyn FnOnce(TaskOutcome) + Send>;

/// Explicit completion signal for one background invocation.
///
/// Dropping it without calling [`Completion::finish`] reports
/// [`TaskOutcome::Failed`], so the host is never left waiting on a task that
/// bailed out early.
pub struct Completion {
    signal: Option<Signal>,
}

impl Completion {
    pub fn new(signal: impl FnOnce(TaskOutcome) + Send + 'static) -> Self {
        Self {
            signal: Some(Box::new(signal)),
        }
    }

    pub fn finish(mut self, outcome: TaskOutcome) {
        if let Some(signal) = self.signal.take() {
            signal(outcome);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.signal.is_some())
            .finish()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal(TaskOutcome::Failed);
        }
    }
}

/// Work the host runs outside the normal application lifecycle.
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, budget: Duration, done: Completion);
}

/// Registration side of the host contract.
pub trait BackgroundHost: Send + Sync {
    fn register(&self, task: Arc<dyn BackgroundTask>) -> Result<TaskId, crate::BoxError>;
    fn unregister(&self, id: TaskId);
}
