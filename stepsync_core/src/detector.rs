//! Peak-threshold step detection.
//!
//! One comparison and one subtraction per sample: a reading whose magnitude
//! exceeds `threshold` registers a step unless the previous accepted step is
//! younger than `cooldown_ms`. The cooldown swallows the ringing of a single
//! footfall, so a magnitude held above the threshold yields one step per
//! cooldown interval rather than one per sample.

use stepsync_traits::MotionVector;

use crate::config::DetectorCfg;
use crate::metrics::{MetricKind, MetricSample};

#[derive(Debug, Clone)]
pub struct StepDetector {
    cfg: DetectorCfg,
    last_step_ms: Option<u64>,
    total_steps: u64,
}

impl StepDetector {
    pub fn new(cfg: DetectorCfg) -> Self {
        Self {
            cfg,
            last_step_ms: None,
            total_steps: 0,
        }
    }

    pub fn cfg(&self) -> &DetectorCfg {
        &self.cfg
    }

    /// Feed one reading taken at `at_ms`.
    ///
    /// Returns the Steps and Distance increments when a step is registered.
    #[inline]
    pub fn observe(&mut self, v: MotionVector, at_ms: u64) -> Option<[MetricSample; 2]> {
        let m = v.magnitude();
        if !m.is_finite() || m <= self.cfg.threshold {
            return None;
        }
        if let Some(last) = self.last_step_ms
            && at_ms.saturating_sub(last) < self.cfg.cooldown_ms
        {
            return None;
        }
        self.last_step_ms = Some(at_ms);
        self.total_steps = self.total_steps.saturating_add(1);
        Some([
            MetricSample {
                metric_name: MetricKind::Steps.name(),
                value: 1.0,
                timestamp_ms: at_ms,
            },
            MetricSample {
                metric_name: MetricKind::Distance.name(),
                value: self.cfg.stride_m,
                timestamp_ms: at_ms,
            },
        ])
    }

    /// Steps registered by this detector since construction.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn last_step_ms(&self) -> Option<u64> {
        self.last_step_ms
    }

    /// Forget the last accepted step, e.g. when the sample clock restarts.
    pub fn reset_timing(&mut self) {
        self.last_step_ms = None;
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(DetectorCfg::default())
    }
}
