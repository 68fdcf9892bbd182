//! Maps `Box<dyn Error>` from trait boundaries to typed `TrackerError`.
//!
//! The traits in `stepsync_traits` use `Box<dyn Error + Send + Sync>` so any
//! adapter can plug in; this module converts those to our taxonomy, with an
//! optional feature-gated path for `stepsync_hardware::HwError` downcasting.

use crate::error::TrackerError;

/// Map an error raised by a motion sensor.
pub fn map_sensor_error(e: &(dyn std::error::Error + 'static)) -> TrackerError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<stepsync_hardware::error::HwError>() {
            use stepsync_hardware::error::HwError;
            return match hw {
                HwError::SensorUnavailable(why) => TrackerError::SensorUnavailable(why.clone()),
                other => TrackerError::SensorUnavailable(other.to_string()),
            };
        }
    }
    TrackerError::SensorUnavailable(e.to_string())
}

/// Map an error raised by the remote gateway.
pub fn map_sync_error(e: &(dyn std::error::Error + 'static)) -> TrackerError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<stepsync_hardware::error::HwError>() {
            use stepsync_hardware::error::HwError;
            return match hw {
                HwError::RemoteOffline => TrackerError::SyncFailure("remote offline".into()),
                HwError::RemoteRejected { metric, reason } => {
                    TrackerError::SyncFailure(format!("{metric} rejected: {reason}"))
                }
                other => TrackerError::SyncFailure(other.to_string()),
            };
        }
    }
    TrackerError::SyncFailure(e.to_string())
}
