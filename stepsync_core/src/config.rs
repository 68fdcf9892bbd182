//! Runtime configuration for the tracking engine.
//!
//! These are the structs the scheduler and detector consume. They are
//! separate from the TOML-deserialized config in `stepsync_config`.

use std::time::Duration;

/// Motion sampling.
#[derive(Debug, Clone)]
pub struct SamplerCfg {
    /// Sampling rate in Hz; drives the sampler period.
    pub sample_rate_hz: u32,
    /// Max wait for one sensor reading.
    pub read_timeout: Duration,
}

impl Default for SamplerCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            read_timeout: Duration::from_millis(200),
        }
    }
}

/// Peak-threshold step detection.
#[derive(Debug, Clone)]
pub struct DetectorCfg {
    /// Magnitude a reading must exceed to count as a footfall.
    pub threshold: f32,
    /// Minimum spacing between accepted steps, in ms.
    pub cooldown_ms: u64,
    /// Distance credited per step, in meters.
    pub stride_m: f64,
}

impl Default for DetectorCfg {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            cooldown_ms: 500,
            stride_m: 0.75,
        }
    }
}

/// Periodic reconciliation and persistence cadence.
#[derive(Debug, Clone)]
pub struct SyncCfg {
    /// Periodic sync tick.
    pub interval: Duration,
    /// Flush cadence for a dirty snapshot.
    pub persist_interval: Duration,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            persist_interval: Duration::from_secs(30),
        }
    }
}

impl SyncCfg {
    /// A tick is skipped when the last successful sync is younger than this.
    pub fn min_spacing(&self) -> Duration {
        self.interval / 2
    }
}

/// Everything the scheduler needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct TrackerCfg {
    pub sampler: SamplerCfg,
    pub detector: DetectorCfg,
    pub sync: SyncCfg,
}
