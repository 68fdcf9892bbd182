pub mod background;
pub mod clock;

pub use background::{BackgroundHost, BackgroundTask, Completion, TaskId, TaskOutcome};
pub use clock::{Clock, ManualClock, MonotonicClock};

use std::collections::BTreeMap;

/// Error type used at every adapter boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One gravity-free acceleration reading, in g.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionVector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MotionVector {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Raw 3-axis motion source.
///
/// `open` is called once per subscription and fails when no stream can be
/// obtained. `read` blocks until a reading is ready or `timeout` expires.
pub trait MotionSensor {
    fn open(&mut self) -> Result<(), BoxError>;
    fn read(&mut self, timeout: std::time::Duration) -> Result<MotionVector, BoxError>;
    fn close(&mut self) {}
}

impl<T: MotionSensor + ?Sized> MotionSensor for Box<T> {
    fn open(&mut self) -> Result<(), BoxError> {
        (**self).open()
    }
    fn read(&mut self, timeout: std::time::Duration) -> Result<MotionVector, BoxError> {
        (**self).read(timeout)
    }
    fn close(&mut self) {
        (**self).close();
    }
}

/// Metric values as held by the remote store, tagged with the reset epoch
/// they belong to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteSnapshot {
    pub epoch: u64,
    pub values: BTreeMap<String, f64>,
}

/// Remote metric store.
///
/// Implementations never see the in-memory snapshot; they only answer pulls
/// and accept pushes.
pub trait RemoteSyncGateway {
    fn pull(&mut self, metric_names: &[String]) -> Result<RemoteSnapshot, BoxError>;
    fn push(&mut self, metric_name: &str, value: f64, epoch: u64) -> Result<(), BoxError>;
}

impl<T: RemoteSyncGateway + ?Sized> RemoteSyncGateway for Box<T> {
    fn pull(&mut self, metric_names: &[String]) -> Result<RemoteSnapshot, BoxError> {
        (**self).pull(metric_names)
    }
    fn push(&mut self, metric_name: &str, value: f64, epoch: u64) -> Result<(), BoxError> {
        (**self).push(metric_name, value, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::MotionVector;

    #[test]
    fn magnitude_is_euclidean_norm() {
        let v = MotionVector::new(0.3, 0.0, 0.4);
        assert!((v.magnitude() - 0.5).abs() < 1e-6);
        assert_eq!(MotionVector::default().magnitude(), 0.0);
    }
}
