use rstest::rstest;
use stepsync_config::{load_file, load_toml};

#[rstest]
#[case("[sensor]\nsample_rate_hz = 0\n", "sensor.sample_rate_hz must be in 1..=200")]
#[case("[sensor]\nsample_rate_hz = 500\n", "sensor.sample_rate_hz must be in 1..=200")]
#[case("[sensor]\nread_timeout_ms = 0\n", "sensor.read_timeout_ms must be >= 1")]
#[case("[detector]\nthreshold = 0.0\n", "detector.threshold must be a finite value > 0")]
#[case("[detector]\nthreshold = -0.3\n", "detector.threshold must be a finite value > 0")]
#[case("[detector]\ncooldown_ms = 0\n", "detector.cooldown_ms must be in 1..=10000")]
#[case("[detector]\nstride_m = 0.0\n", "detector.stride_m must be in (0.0, 3.0]")]
#[case("[detector]\nstride_m = 4.0\n", "detector.stride_m must be in (0.0, 3.0]")]
#[case("[sync]\ninterval_ms = 0\n", "sync.interval_ms must be >= 1")]
#[case("[sync]\nheadless_budget_ms = 0\n", "sync.headless_budget_ms must be >= 1")]
#[case("[sync]\nhost_interval_ms = 0\n", "sync.host_interval_ms must be >= 1")]
#[case("[storage]\nsnapshot_path = \"\"\n", "storage.snapshot_path must not be empty")]
#[case("[storage]\npersist_interval_ms = 0\n", "storage.persist_interval_ms must be >= 1")]
#[case("[remote]\npath = \"\"\n", "remote.path must not be empty")]
#[case("[display]\ndaily_step_goal = 0\n", "display.daily_step_goal must be >= 1")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] message: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(message),
        "expected {message:?}, got {err}"
    );
}

#[test]
fn accepts_full_document() {
    let toml = r#"
[sensor]
sample_rate_hz = 50
read_timeout_ms = 100

[detector]
threshold = 0.25
cooldown_ms = 400
stride_m = 0.7

[sync]
interval_ms = 60000
headless_budget_ms = 20000
host_interval_ms = 120000

[storage]
snapshot_path = "/tmp/state.json"
persist_interval_ms = 5000

[remote]
path = "/tmp/remote.json"

[display]
daily_step_goal = 8000

[logging]
file = "/tmp/stepsync.log"
level = "debug"
rotation = "daily"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.sensor.sample_rate_hz, 50);
    assert_eq!(cfg.detector.cooldown_ms, 400);
    assert_eq!(cfg.display.daily_step_goal, 8000);
    assert_eq!(cfg.logging.level.as_deref(), Some("debug"));
}

#[test]
fn rejects_unknown_rotation() {
    assert!(load_toml("[logging]\nrotation = \"weekly\"\n").is_err());
}

#[test]
fn load_file_reports_path_on_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[sensor\n").unwrap();
    let err = load_file(&path).expect_err("broken TOML");
    assert!(format!("{err}").contains("parse config"));
}
