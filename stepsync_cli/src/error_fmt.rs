//! Human-readable error descriptions, exit codes and structured JSON errors.

use stepsync_core::error::{BuildError, TrackerError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => {
                "What happened: No motion source was provided to the tracker.\nLikely causes: The sensor failed to construct or was not wired into the builder.\nHow to fix: Pass a sensor via with_sensor(...) or check --replay/--cadence-hz.".to_string()
            }
            BuildError::MissingGateway => {
                "What happened: No remote store was provided to the tracker.\nLikely causes: The remote adapter was not wired into the builder.\nHow to fix: Pass a gateway via with_gateway(...).".to_string()
            }
            BuildError::MissingStore => {
                "What happened: No snapshot store was provided to the tracker.\nLikely causes: The storage adapter was not wired into the builder.\nHow to fix: Pass a store via with_store(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TrackerError>() {
        return match te {
            TrackerError::SensorUnavailable(why) => format!(
                "What happened: The motion sensor is unavailable ({why}).\nLikely causes: No accelerometer, permission denied, or an empty replay trace.\nHow to fix: Check the device or the --replay file; steps are not counted until it works."
            ),
            TrackerError::InitializationFailure(why) => format!(
                "What happened: Tracking could not start ({why}).\nLikely causes: Unreadable snapshot file or the motion sensor refused to open.\nHow to fix: Inspect storage.snapshot_path; move a corrupt file aside to start fresh."
            ),
            TrackerError::PersistenceFailure(why) => format!(
                "What happened: The metrics snapshot could not be read or written ({why}).\nLikely causes: Missing permissions, full disk, or a corrupt file.\nHow to fix: Check storage.snapshot_path and free space."
            ),
            TrackerError::SyncFailure(why) => format!(
                "What happened: Reconciliation with the remote store failed ({why}).\nLikely causes: The remote file is unreadable or rejected a stale epoch.\nHow to fix: Check remote.path; the next sync retries automatically."
            ),
            TrackerError::State(why) => format!(
                "What happened: The request was rejected by the tracker ({why}).\nLikely causes: The session was shut down or a value was invalid.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config or trace loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("trace csv must have headers") {
        return "Invalid headers in trace CSV. Expected 'x,y,z'.".to_string();
    }

    if lower.contains("invalid configuration") {
        let root = err.root_cause();
        return format!(
            "What happened: Configuration is invalid ({root}).\nLikely causes: Out-of-range values or a TOML syntax error.\nHow to fix: Edit the config file and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per failure class; anything untyped is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<TrackerError>() {
        Some(TrackerError::SensorUnavailable(_) | TrackerError::InitializationFailure(_)) => 3,
        Some(TrackerError::PersistenceFailure(_)) => 4,
        Some(TrackerError::SyncFailure(_)) => 5,
        Some(TrackerError::State(_)) => 6,
        None => 1,
    }
}

pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(te) = err.downcast_ref::<TrackerError>() {
        return match te {
            TrackerError::SensorUnavailable(_) => "SensorUnavailable",
            TrackerError::PersistenceFailure(_) => "PersistenceFailure",
            TrackerError::SyncFailure(_) => "SyncFailure",
            TrackerError::InitializationFailure(_) => "InitializationFailure",
            TrackerError::State(_) => "State",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TrackerError::SensorUnavailable("x".into()), 3)]
    #[case(TrackerError::InitializationFailure("x".into()), 3)]
    #[case(TrackerError::PersistenceFailure("x".into()), 4)]
    #[case(TrackerError::SyncFailure("x".into()), 5)]
    #[case(TrackerError::State("x".into()), 6)]
    fn tracker_errors_map_to_stable_codes(#[case] e: TrackerError, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&eyre::Report::new(e)), code);
    }

    #[test]
    fn untyped_errors_are_generic() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }

    #[test]
    fn wrapped_config_error_shows_root_cause() {
        let err = eyre::eyre!("sensor.sample_rate_hz must be in 1..=200")
            .wrap_err("invalid configuration");
        let text = humanize(&err);
        assert!(text.contains("Configuration is invalid"));
        assert!(text.contains("sample_rate_hz"));
    }

    #[test]
    fn json_error_carries_reason_and_code() {
        let err = eyre::Report::new(TrackerError::PersistenceFailure("disk full".into()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "PersistenceFailure");
        assert_eq!(v["exit_code"], 4);
        assert!(v["message"].as_str().unwrap().contains("disk full"));
    }
}
