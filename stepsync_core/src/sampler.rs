//! Background motion sampling.
//!
//! Spawns a thread that owns the motion sensor while subscribed, pushes
//! readings to the single consumer via a bounded channel, and tracks the
//! last-ok timestamp for stall reporting.
//!
//! Delivery is at-most-once: a reading the consumer does not take within one
//! sample period is dropped, never replayed.
//!
//! Safety: each subscription owns exactly one thread, which is joined by
//! `stop()` (and therefore on drop) before the call returns. A panicking
//! read ends the subscription but not the sensor, so `start` can reopen it.
use crossbeam_channel as xch;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use stepsync_traits::{Clock, MotionSensor, MotionVector};

use crate::config::SamplerCfg;
use crate::error::TrackerError;
use crate::hw_error::map_sensor_error;

pub type BoxedSensor = Box<dyn MotionSensor + Send>;
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// A reading stamped with milliseconds since the sampler was created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReading {
    pub vector: MotionVector,
    pub at_ms: u64,
}

struct Subscription {
    rx: xch::Receiver<MotionReading>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    last_ok: Arc<AtomicU64>,
    /// Hands the sensor back when the thread exits
    join_handle: Option<JoinHandle<BoxedSensor>>,
}

pub struct SensorSampler {
    sensor: Option<BoxedSensor>,
    cfg: SamplerCfg,
    clock: SharedClock,
    epoch: Instant,
    active: Option<Subscription>,
}

impl SensorSampler {
    pub fn new(sensor: BoxedSensor, cfg: SamplerCfg, clock: SharedClock) -> Self {
        let epoch = clock.now();
        Self {
            sensor: Some(sensor),
            cfg,
            clock,
            epoch,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Receiving end of the current subscription, if any.
    pub fn receiver(&self) -> Option<&xch::Receiver<MotionReading>> {
        self.active.as_ref().map(|s| &s.rx)
    }

    /// Open the sensor and begin sampling. A no-op while already running.
    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.active.is_some() {
            tracing::debug!("sampler already running");
            return Ok(());
        }
        let Some(mut sensor) = self.sensor.take() else {
            return Err(TrackerError::SensorUnavailable(
                "sensor lost after a sampling thread failure".into(),
            ));
        };
        if let Err(e) = sensor.open() {
            self.sensor = Some(sensor);
            let err = map_sensor_error(e.as_ref());
            tracing::warn!(error = %err, "motion sensor failed to open");
            return Err(err);
        }

        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_bg = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_bg = last_ok.clone();
        let period = Duration::from_millis(crate::util::period_ms(self.cfg.sample_rate_hz));
        let timeout = self.cfg.read_timeout;
        let clock = self.clock.clone();
        let epoch = self.epoch;

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_bg.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                let read = std::panic::catch_unwind(AssertUnwindSafe(|| sensor.read(timeout)));
                match read {
                    Ok(Ok(vector)) => {
                        let at_ms = clock.ms_since(epoch);
                        match tx.send_timeout(MotionReading { vector, at_ms }, period) {
                            Ok(()) => last_ok_bg.store(at_ms, Ordering::Relaxed),
                            Err(xch::SendTimeoutError::Timeout(_)) => {
                                tracing::trace!(at_ms, "consumer busy, reading dropped");
                            }
                            Err(xch::SendTimeoutError::Disconnected(_)) => {
                                tracing::debug!("sampler consumer disconnected, exiting thread");
                                break;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        // Silent or flaky sensor: skip this slot, keep pacing.
                        tracing::trace!(error = %e, "sensor read skipped");
                    }
                    Err(_) => {
                        // Ending the thread disconnects the consumer, which
                        // sees the subscription as gone. The sensor is
                        // still handed back for the next start.
                        tracing::error!("sensor read panicked; ending subscription");
                        break;
                    }
                }

                if shutdown_bg.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            sensor.close();
            tracing::trace!("sampler thread exiting cleanly");
            sensor
        });

        self.active = Some(Subscription {
            rx,
            shutdown,
            last_ok,
            join_handle: Some(join_handle),
        });
        tracing::info!(hz = self.cfg.sample_rate_hz, "sampler started");
        Ok(())
    }

    /// Unsubscribe. When this returns the sampling thread has exited and no
    /// further readings exist anywhere.
    pub fn stop(&mut self) {
        let Some(mut sub) = self.active.take() else {
            return;
        };
        sub.shutdown.store(true, Ordering::Relaxed);
        // Dropping the receiver discards any pending reading and fails the
        // thread's next send immediately.
        drop(sub.rx);
        if let Some(handle) = sub.join_handle.take() {
            match handle.join() {
                Ok(sensor) => {
                    self.sensor = Some(sensor);
                    tracing::info!("sampler stopped");
                }
                Err(e) => {
                    tracing::warn!(?e, "sampler thread panicked; sensor lost");
                }
            }
        }
    }

    /// Milliseconds since the last delivered reading of the current
    /// subscription, measured on the sampler clock.
    pub fn stalled_for_ms(&self) -> Option<u64> {
        self.active.as_ref().map(|s| {
            self.clock
                .ms_since(self.epoch)
                .saturating_sub(s.last_ok.load(Ordering::Relaxed))
        })
    }
}

impl Drop for SensorSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
