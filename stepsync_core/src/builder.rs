//! Type-state builder for `BackgroundScheduler`.
//!
//! The builder enforces at compile time that a sensor, a remote gateway and a
//! snapshot store are provided before `build()` is available. `try_build()`
//! is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use stepsync_traits::{Clock, MonotonicClock, MotionSensor, RemoteSyncGateway};

use crate::cache::LocalMetricsCache;
use crate::config::TrackerCfg;
use crate::error::{BuildError, Result};
use crate::sampler::{BoxedSensor, SensorSampler, SharedClock};
use crate::scheduler::BackgroundScheduler;
use crate::store::{SharedStore, SnapshotStore};
use crate::sync::BoxedGateway;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `BackgroundScheduler`. The config is validated on `build()`.
pub struct SchedulerBuilder<S, G, P> {
    sensor: Option<BoxedSensor>,
    gateway: Option<BoxedGateway>,
    store: Option<SharedStore>,
    clock: Option<SharedClock>,
    cfg: Option<TrackerCfg>,
    _s: PhantomData<S>,
    _g: PhantomData<G>,
    _p: PhantomData<P>,
}

impl Default for SchedulerBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            gateway: None,
            store: None,
            clock: None,
            cfg: None,
            _s: PhantomData,
            _g: PhantomData,
            _p: PhantomData,
        }
    }
}

impl BackgroundScheduler {
    /// Start building a scheduler.
    pub fn builder() -> SchedulerBuilder<Missing, Missing, Missing> {
        SchedulerBuilder::default()
    }
}

fn validate(cfg: &TrackerCfg) -> std::result::Result<(), BuildError> {
    if cfg.sampler.sample_rate_hz == 0 {
        return Err(BuildError::InvalidConfig("sample_rate_hz must be > 0"));
    }
    if cfg.sampler.read_timeout.is_zero() {
        return Err(BuildError::InvalidConfig("read_timeout must be > 0"));
    }
    if !cfg.detector.threshold.is_finite() || cfg.detector.threshold <= 0.0 {
        return Err(BuildError::InvalidConfig("threshold must be finite and > 0"));
    }
    if cfg.detector.cooldown_ms == 0 {
        return Err(BuildError::InvalidConfig("cooldown_ms must be >= 1"));
    }
    if !(cfg.detector.stride_m.is_finite() && cfg.detector.stride_m > 0.0) {
        return Err(BuildError::InvalidConfig("stride_m must be finite and > 0"));
    }
    if cfg.sync.interval.is_zero() || cfg.sync.persist_interval.is_zero() {
        return Err(BuildError::InvalidConfig("sync intervals must be > 0"));
    }
    Ok(())
}

impl<S, G, P> SchedulerBuilder<S, G, P> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<BackgroundScheduler> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        let gateway = self
            .gateway
            .ok_or_else(|| eyre::Report::new(BuildError::MissingGateway))?;
        let store = self
            .store
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStore))?;
        let cfg = self.cfg.unwrap_or_default();
        validate(&cfg).map_err(eyre::Report::new)?;

        let clock: SharedClock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let sampler = SensorSampler::new(sensor, cfg.sampler.clone(), clock);
        let cache = LocalMetricsCache::new(store);
        Ok(BackgroundScheduler::spawn(cfg, sampler, gateway, cache))
    }

    pub fn with_config(mut self, cfg: TrackerCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Provide a custom clock for sample timestamps; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }
}

impl<G, P> SchedulerBuilder<Missing, G, P> {
    pub fn with_sensor(
        self,
        sensor: impl MotionSensor + Send + 'static,
    ) -> SchedulerBuilder<Set, G, P> {
        SchedulerBuilder {
            sensor: Some(Box::new(sensor)),
            gateway: self.gateway,
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _s: PhantomData,
            _g: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<S, P> SchedulerBuilder<S, Missing, P> {
    pub fn with_gateway(
        self,
        gateway: impl RemoteSyncGateway + Send + 'static,
    ) -> SchedulerBuilder<S, Set, P> {
        SchedulerBuilder {
            sensor: self.sensor,
            gateway: Some(Box::new(gateway)),
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _s: PhantomData,
            _g: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<S, G> SchedulerBuilder<S, G, Missing> {
    pub fn with_store(self, store: impl SnapshotStore + 'static) -> SchedulerBuilder<S, G, Set> {
        self.with_shared_store(Arc::new(store))
    }

    pub fn with_shared_store(self, store: SharedStore) -> SchedulerBuilder<S, G, Set> {
        SchedulerBuilder {
            sensor: self.sensor,
            gateway: self.gateway,
            store: Some(store),
            clock: self.clock,
            cfg: self.cfg,
            _s: PhantomData,
            _g: PhantomData,
            _p: PhantomData,
        }
    }
}

impl SchedulerBuilder<Set, Set, Set> {
    /// Validate and spawn the session. Only available when sensor, gateway
    /// and store are set.
    pub fn build(self) -> Result<BackgroundScheduler> {
        self.try_build()
    }
}
