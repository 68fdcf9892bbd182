//! Shared rig for scheduler-level tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use stepsync_core::mocks::{MemoryRemote, ScriptedSensor};
use stepsync_core::{
    BackgroundScheduler, DetectorCfg, MemoryStore, SamplerCfg, SyncCfg, TrackerCfg,
};
use stepsync_traits::{BoxError, ManualClock, MotionSensor, MotionVector};

/// 10 Hz on a manual clock: readings are 100 ms apart in sample time no
/// matter how fast the test machine is.
pub fn tracker_cfg() -> TrackerCfg {
    TrackerCfg {
        sampler: SamplerCfg {
            sample_rate_hz: 10,
            read_timeout: Duration::from_millis(20),
        },
        detector: DetectorCfg::default(),
        sync: SyncCfg {
            interval: Duration::from_secs(3600),
            persist_interval: Duration::from_secs(3600),
        },
    }
}

pub struct Rig {
    pub scheduler: BackgroundScheduler,
    pub sensor: ScriptedSensor,
    pub remote: MemoryRemote,
    pub store: MemoryStore,
    pub clock: ManualClock,
}

/// The test-side copies of every double wired into a scheduler.
pub struct Doubles {
    pub sensor: ScriptedSensor,
    pub remote: MemoryRemote,
    pub store: MemoryStore,
    pub clock: ManualClock,
}

pub fn build(cfg: TrackerCfg, store: MemoryStore, remote: MemoryRemote) -> (BackgroundScheduler, Doubles) {
    let sensor = ScriptedSensor::new();
    let clock = ManualClock::new();
    let scheduler = BackgroundScheduler::builder()
        .with_sensor(sensor.clone())
        .with_gateway(remote.clone())
        .with_store(store.clone())
        .with_clock(clock.clone())
        .with_config(cfg)
        .build()
        .expect("scheduler builds");
    (
        scheduler,
        Doubles {
            sensor,
            remote,
            store,
            clock,
        },
    )
}

pub fn rig_with(cfg: TrackerCfg, store: MemoryStore, remote: MemoryRemote) -> Rig {
    let (scheduler, d) = build(cfg, store, remote);
    Rig {
        scheduler,
        sensor: d.sensor,
        remote: d.remote,
        store: d.store,
        clock: d.clock,
    }
}

pub fn rig() -> Rig {
    rig_with(tracker_cfg(), MemoryStore::new(), MemoryRemote::new())
}

/// One footfall followed by five quiet samples: 600 ms of sample time, so
/// consecutive peaks are always past the default 500 ms cooldown.
pub fn walk(steps: usize) -> Vec<MotionVector> {
    let mut v = Vec::with_capacity(steps * 6);
    for _ in 0..steps {
        v.push(MotionVector::new(0.0, 0.0, 1.0));
        v.extend(std::iter::repeat_n(MotionVector::default(), 5));
    }
    v
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn steps(s: &BackgroundScheduler) -> f64 {
    s.snapshot().expect("snapshot").get("Steps")
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Scripted sensor whose first read panics; later reads behave normally.
#[derive(Clone)]
pub struct PanicsOnce {
    pub inner: ScriptedSensor,
    armed: Arc<AtomicBool>,
}

impl PanicsOnce {
    pub fn new(inner: ScriptedSensor) -> Self {
        Self {
            inner,
            armed: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MotionSensor for PanicsOnce {
    fn open(&mut self) -> Result<(), BoxError> {
        self.inner.open()
    }

    fn read(&mut self, timeout: Duration) -> Result<MotionVector, BoxError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("driver fault");
        }
        self.inner.read(timeout)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
