//! `From` implementations bridging `stepsync_config` types to `stepsync_core` types.

use std::time::Duration;

use crate::config::{DetectorCfg, SamplerCfg, SyncCfg, TrackerCfg};

// ── SamplerCfg ───────────────────────────────────────────────────────────────

impl From<&stepsync_config::SensorCfg> for SamplerCfg {
    fn from(c: &stepsync_config::SensorCfg) -> Self {
        Self {
            sample_rate_hz: c.sample_rate_hz,
            read_timeout: Duration::from_millis(c.read_timeout_ms),
        }
    }
}

// ── DetectorCfg ──────────────────────────────────────────────────────────────

impl From<&stepsync_config::DetectorCfg> for DetectorCfg {
    fn from(c: &stepsync_config::DetectorCfg) -> Self {
        Self {
            threshold: c.threshold,
            cooldown_ms: c.cooldown_ms,
            stride_m: c.stride_m,
        }
    }
}

// ── TrackerCfg ───────────────────────────────────────────────────────────────

impl From<&stepsync_config::Config> for TrackerCfg {
    fn from(c: &stepsync_config::Config) -> Self {
        Self {
            sampler: (&c.sensor).into(),
            detector: (&c.detector).into(),
            sync: SyncCfg {
                interval: Duration::from_millis(c.sync.interval_ms),
                persist_interval: Duration::from_millis(c.storage.persist_interval_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_with_config_defaults() {
        let cfg = stepsync_config::Config::default();
        let tracker: TrackerCfg = (&cfg).into();
        let ours = TrackerCfg::default();
        assert_eq!(tracker.sampler.sample_rate_hz, ours.sampler.sample_rate_hz);
        assert_eq!(tracker.sampler.read_timeout, ours.sampler.read_timeout);
        assert_eq!(tracker.detector.cooldown_ms, ours.detector.cooldown_ms);
        assert_eq!(tracker.detector.threshold, ours.detector.threshold);
        assert_eq!(tracker.detector.stride_m, ours.detector.stride_m);
        assert_eq!(tracker.sync.interval, ours.sync.interval);
        assert_eq!(tracker.sync.persist_interval, ours.sync.persist_interval);
    }
}
