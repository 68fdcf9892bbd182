//! Platform adapters for the activity tracker.
//!
//! Everything here sits behind a `stepsync_traits` seam: motion sources, the
//! remote metric store and the host's background scheduler.
pub mod error;
pub mod host;
pub mod remote;

pub use host::ThreadHost;
pub use remote::FileRemoteStore;

use std::time::Duration;

use stepsync_traits::{BoxError, MotionSensor, MotionVector};

use crate::error::HwError;

/// Synthetic walker: emits a gait-like acceleration pattern.
///
/// Each stride produces one pulse of roughly `peak_g` on the vertical axis,
/// with small deterministic noise on every axis. Time advances by one sample
/// period per read, so the pattern is independent of wall-clock pacing.
pub struct SimulatedWalker {
    cadence_hz: f32,
    sample_rate_hz: u32,
    peak_g: f32,
    noise_g: f32,
    available: bool,
    tick: u64,
    rng: u32,
}

impl SimulatedWalker {
    pub fn new(cadence_hz: f32, sample_rate_hz: u32) -> Self {
        Self {
            cadence_hz: cadence_hz.max(0.0),
            sample_rate_hz: sample_rate_hz.max(1),
            peak_g: 0.6,
            noise_g: 0.05,
            available: true,
            tick: 0,
            rng: 0x9E37_79B9,
        }
    }

    /// A walker standing still: readings are noise only.
    pub fn idle(sample_rate_hz: u32) -> Self {
        Self::new(0.0, sample_rate_hz)
    }

    /// Simulate a device without a motion sensor.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_peak(mut self, peak_g: f32) -> Self {
        self.peak_g = peak_g;
        self
    }

    fn noise(&mut self) -> f32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let unit = (x as f32) / (u32::MAX as f32);
        (unit * 2.0 - 1.0) * self.noise_g
    }

    fn vertical(&self) -> f32 {
        if self.cadence_hz <= 0.0 {
            return 0.0;
        }
        let t = self.tick as f32 / self.sample_rate_hz as f32;
        let phase = (t * self.cadence_hz).fract();
        // Heel strike: half-sine over the first 40% of each stride.
        if phase < 0.4 {
            self.peak_g * (phase / 0.4 * std::f32::consts::PI).sin()
        } else {
            0.0
        }
    }
}

impl MotionSensor for SimulatedWalker {
    fn open(&mut self) -> Result<(), BoxError> {
        if self.available {
            tracing::debug!(cadence_hz = self.cadence_hz, "simulated walker opened");
            Ok(())
        } else {
            Err(Box::new(HwError::SensorUnavailable(
                "no accelerometer on this device".into(),
            )))
        }
    }

    fn read(&mut self, _timeout: Duration) -> Result<MotionVector, BoxError> {
        if !self.available {
            return Err(Box::new(HwError::SensorUnavailable("sensor detached".into())));
        }
        let z = self.vertical() + self.noise();
        let v = MotionVector::new(self.noise(), self.noise(), z);
        self.tick = self.tick.wrapping_add(1);
        Ok(v)
    }
}

/// Replays a recorded trace, one vector per read.
///
/// Once the trace is exhausted every read waits out its timeout and fails,
/// the way a silent sensor behaves.
pub struct ReplaySensor {
    samples: Vec<MotionVector>,
    cursor: usize,
    looped: bool,
}

impl ReplaySensor {
    pub fn new(samples: Vec<MotionVector>) -> Self {
        Self {
            samples,
            cursor: 0,
            looped: false,
        }
    }

    /// Restart from the beginning when the trace ends.
    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.cursor)
    }
}

impl MotionSensor for ReplaySensor {
    fn open(&mut self) -> Result<(), BoxError> {
        if self.samples.is_empty() {
            return Err(Box::new(HwError::SensorUnavailable("empty trace".into())));
        }
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<MotionVector, BoxError> {
        if self.cursor >= self.samples.len() {
            if self.looped && !self.samples.is_empty() {
                self.cursor = 0;
            } else {
                std::thread::sleep(timeout);
                return Err(Box::new(HwError::Timeout));
            }
        }
        let v = self.samples[self.cursor];
        self.cursor += 1;
        Ok(v)
    }
}
