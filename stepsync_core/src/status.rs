//! Observable state of a tracking session.

use std::fmt;

use crate::metrics::MetricsSnapshot;

/// Lifecycle of a `TrackingSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Starting = 1,
    Tracking = 2,
    Syncing = 3,
}

impl SchedulerState {
    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Tracking,
            3 => Self::Syncing,
            _ => Self::Stopped,
        }
    }

    /// Sampling is live in both `Tracking` and `Syncing`.
    pub const fn is_tracking(self) -> bool {
        matches!(self, Self::Tracking | Self::Syncing)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Tracking => "tracking",
            Self::Syncing => "syncing",
        })
    }
}

/// User-facing status, as reflected by the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerStatus {
    Idle,
    Tracking,
    Syncing,
    /// The last start attempt failed; the message is shown to the user.
    SensorError(String),
}

impl TrackerStatus {
    pub(crate) fn from_state(state: SchedulerState) -> Self {
        match state {
            SchedulerState::Stopped | SchedulerState::Starting => Self::Idle,
            SchedulerState::Tracking => Self::Tracking,
            SchedulerState::Syncing => Self::Syncing,
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Tracking => f.write_str("tracking"),
            Self::Syncing => f.write_str("syncing"),
            Self::SensorError(why) => write!(f, "sensor error: {why}"),
        }
    }
}

/// Result of one reconciliation request.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncReport {
    /// Pull, merge and push all succeeded; carries the post-merge snapshot.
    Completed(MetricsSnapshot),
    /// The attempt failed; tracking continues and the next tick retries.
    Failed(crate::error::TrackerError),
    /// No attempt was made.
    Skipped(String),
}

impl SyncReport {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
