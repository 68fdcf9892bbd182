//! Host lifecycle glue.
//!
//! `LifecycleCoordinator` turns foreground/background notifications and
//! headless wakes into idempotent scheduler calls. `register_headless` is the
//! one explicit registration with the host's background-execution facility;
//! the returned handle owns that registration.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as xch, select};
use stepsync_traits::{BackgroundHost, BackgroundTask, Completion, TaskId, TaskOutcome};

use crate::error::TrackerError;
use crate::metrics::MetricsSnapshot;
use crate::scheduler::BackgroundScheduler;
use crate::status::{SyncReport, TrackerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

/// What one headless invocation achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessOutcome {
    /// Tracking is live and a sync completed within the budget.
    Synced(MetricsSnapshot),
    /// Tracking is live; no sync result arrived in time, or it failed.
    TrackingOnly,
    /// Tracking could not be ensured.
    Failed(TrackerError),
}

impl HeadlessOutcome {
    pub fn task_outcome(&self) -> TaskOutcome {
        match self {
            Self::Synced(_) => TaskOutcome::NewData,
            Self::TrackingOnly => TaskOutcome::NoData,
            Self::Failed(_) => TaskOutcome::Failed,
        }
    }
}

pub struct LifecycleCoordinator {
    scheduler: BackgroundScheduler,
    last_app_state: Mutex<Option<AppState>>,
    start_error: Mutex<Option<TrackerError>>,
}

impl LifecycleCoordinator {
    pub fn new(scheduler: BackgroundScheduler) -> Self {
        Self {
            scheduler,
            last_app_state: Mutex::new(None),
            start_error: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    fn ensure_tracking(&self) -> Result<(), TrackerError> {
        let res = self.scheduler.ensure_tracking();
        let mut slot = self
            .start_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &res {
            Ok(()) => *slot = None,
            Err(e) => {
                tracing::error!(error = %e, "could not start tracking");
                *slot = Some(e.clone());
            }
        }
        res
    }

    /// Initialize and start tracking at application start.
    pub fn launch(&self) -> Result<(), TrackerError> {
        self.ensure_tracking()
    }

    /// React to a host notification. Repeats of the current state are
    /// dropped; every call below is idempotent anyway.
    pub fn handle(&self, state: AppState) {
        {
            let mut last = self
                .last_app_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == Some(state) {
                tracing::debug!(?state, "duplicate lifecycle event ignored");
                return;
            }
            *last = Some(state);
        }
        match state {
            AppState::Background => self.on_background(),
            AppState::Foreground => self.on_foreground(),
        }
    }

    /// Re-arm sampling and timers, which the host may have paused.
    pub fn on_background(&self) {
        tracing::info!("entering background");
        let _ = self.ensure_tracking();
    }

    /// Pick up remote changes right away instead of waiting for the tick.
    pub fn on_foreground(&self) {
        tracing::info!("entering foreground");
        self.scheduler.sync_now();
    }

    /// Headless contract: initialize, ensure tracking, then wait for one
    /// sync for what is left of `budget` minus a completion reserve.
    /// Never waits past the budget.
    pub fn on_headless(&self, budget: Duration) -> HeadlessOutcome {
        let deadline = Instant::now() + budget.saturating_sub(budget / 10);
        tracing::info!(
            budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            "headless invocation"
        );
        if let Err(e) = self.ensure_tracking() {
            return HeadlessOutcome::Failed(e);
        }
        let reports = self.scheduler.request_sync();
        let remaining = deadline.saturating_duration_since(Instant::now());
        match reports.recv_timeout(remaining) {
            Ok(SyncReport::Completed(snapshot)) => HeadlessOutcome::Synced(snapshot),
            Ok(SyncReport::Failed(e)) => {
                tracing::warn!(error = %e, "headless sync failed");
                HeadlessOutcome::TrackingOnly
            }
            Ok(SyncReport::Skipped(why)) => {
                tracing::debug!(reason = %why, "headless sync skipped");
                HeadlessOutcome::TrackingOnly
            }
            Err(_) => {
                tracing::warn!("headless sync did not finish within budget");
                HeadlessOutcome::TrackingOnly
            }
        }
    }

    pub fn status(&self) -> TrackerStatus {
        let err = self
            .start_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match err {
            Some(e) => TrackerStatus::SensorError(e.to_string()),
            None => TrackerStatus::from_state(self.scheduler.state()),
        }
    }

    /// Feed host notifications from `events` on a listener thread until the
    /// channel closes or the listener is stopped.
    pub fn listen(self: &Arc<Self>, events: xch::Receiver<AppState>) -> LifecycleListener {
        let (stop_tx, stop_rx) = xch::bounded::<()>(1);
        let me = Arc::clone(self);
        let join_handle = std::thread::spawn(move || {
            loop {
                select! {
                    recv(events) -> msg => match msg {
                        Ok(state) => me.handle(state),
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => break,
                }
            }
            tracing::debug!("lifecycle listener exiting");
        });
        LifecycleListener {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }
}

pub struct LifecycleListener {
    stop_tx: Option<xch::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl LifecycleListener {
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("lifecycle listener panicked");
        }
    }
}

impl Drop for LifecycleListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background task run by the host on headless wakes.
pub struct HeadlessTask {
    coordinator: Arc<LifecycleCoordinator>,
}

impl HeadlessTask {
    pub fn new(coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl BackgroundTask for HeadlessTask {
    fn name(&self) -> &str {
        "stepsync-headless"
    }

    fn run(&self, budget: Duration, done: Completion) {
        let res = std::panic::catch_unwind(AssertUnwindSafe(|| self.coordinator.on_headless(budget)));
        let outcome = match res {
            Ok(o) => o.task_outcome(),
            Err(_) => {
                tracing::error!("headless invocation panicked");
                TaskOutcome::Failed
            }
        };
        done.finish(outcome);
    }
}

/// Live registration with a background host. Cancelled on drop.
pub struct HeadlessRegistration {
    host: Arc<dyn BackgroundHost>,
    id: Option<TaskId>,
}

impl HeadlessRegistration {
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(id) = self.id.take() {
            self.host.unregister(id);
            tracing::info!(task_id = id, "headless task unregistered");
        }
    }
}

impl Drop for HeadlessRegistration {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Register the headless entry point with `host`.
pub fn register_headless(
    host: Arc<dyn BackgroundHost>,
    coordinator: Arc<LifecycleCoordinator>,
) -> Result<HeadlessRegistration, TrackerError> {
    let task = Arc::new(HeadlessTask::new(coordinator));
    let id = host
        .register(task)
        .map_err(|e| TrackerError::InitializationFailure(format!("register headless task: {e}")))?;
    tracing::info!(task_id = id, "headless task registered");
    Ok(HeadlessRegistration { host, id: Some(id) })
}
