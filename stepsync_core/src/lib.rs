#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Continuous activity tracking (platform-agnostic).
//!
//! This crate provides the tracking engine. All platform interactions go
//! through the `stepsync_traits` seams: `MotionSensor`, `RemoteSyncGateway`,
//! `BackgroundHost` and `Clock`.
//!
//! ## Architecture
//!
//! - **Sampling**: `SensorSampler` owns the sensor on a paced thread (`sampler`)
//! - **Detection**: peak threshold with cooldown (`detector`)
//! - **Cache**: authoritative snapshot, epochs, merge rule (`cache`, `store`)
//! - **Session**: single-writer actor and state machine (`scheduler`)
//! - **Lifecycle**: foreground/background/headless glue (`lifecycle`)
//!
//! ## Threads
//!
//! One session thread owns all mutable tracking state. The sampler, the sync
//! worker and the persist worker each run on their own thread and talk to the
//! session over `crossbeam-channel`; none of them touches the snapshot.

pub mod builder;
pub mod cache;
pub mod config;
pub mod conversions;
pub mod detector;
pub mod error;
pub mod hw_error;
pub mod lifecycle;
pub mod metrics;
pub mod mocks;
pub mod sampler;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod sync;
pub mod util;

pub use builder::{Missing, SchedulerBuilder, Set};
pub use cache::{LocalMetricsCache, MergeOutcome};
pub use config::{DetectorCfg, SamplerCfg, SyncCfg, TrackerCfg};
pub use detector::StepDetector;
pub use error::{BuildError, Report, Result, TrackerError};
pub use lifecycle::{
    AppState, HeadlessOutcome, HeadlessRegistration, HeadlessTask, LifecycleCoordinator,
    LifecycleListener, register_headless,
};
pub use metrics::{
    MetricDefinition, MetricKind, MetricSample, MetricsHistoryEntry, MetricsSnapshot,
    available_metrics, coming_soon_metrics, tracked_metric_names,
};
pub use sampler::{MotionReading, SensorSampler};
pub use scheduler::BackgroundScheduler;
pub use status::{SchedulerState, SyncReport, TrackerStatus};
pub use store::{JsonFileStore, MemoryStore, PersistedMetrics, SharedStore, SnapshotStore};
