#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and motion-trace parsing for the activity tracker.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Trace CSV loader enforces headers so recorded walks can be replayed
//!   through the same pipeline as a live sensor.
use serde::Deserialize;
use std::path::PathBuf;

/// Motion trace CSV schema.
///
/// Expected headers:
/// x,y,z
///
/// Example:
/// x,y,z
/// 0.02,-0.01,0.05
/// 0.41,0.10,0.22
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct TraceRow {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorCfg {
    /// Sampling rate of the motion stream.
    pub sample_rate_hz: u32,
    /// Max wait for one reading before the sample slot is skipped.
    pub read_timeout_ms: u64,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            read_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DetectorCfg {
    /// Magnitude (g) a reading must exceed to count as a footfall.
    pub threshold: f32,
    /// Minimum spacing between two accepted steps.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncCfg {
    /// Periodic reconciliation tick.
    pub interval_ms: u64,
    /// Time the host grants one headless invocation.
    pub headless_budget_ms: u64,
    /// How often the host wakes the headless task.
    pub host_interval_ms: u64,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            interval_ms: 15 * 60 * 1000,
            headless_budget_ms: 25_000,
            host_interval_ms: 15 * 60 * 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    /// Durable snapshot location (JSON).
    pub snapshot_path: PathBuf,
    /// Periodic flush of a dirty snapshot.
    pub persist_interval_ms: u64,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("stepsync-state.json"),
            persist_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RemoteCfg {
    /// File-backed remote store document.
    pub path: PathBuf,
}

impl Default for RemoteCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stepsync-remote.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayCfg {
    pub daily_step_goal: u64,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            daily_step_goal: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Never,
    Daily,
    Hourly,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<PathBuf>,  // path to .log (JSON lines)
    pub level: Option<String>,  // "info","debug"
    pub rotation: Rotation,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorCfg,
    pub detector: DetectorCfg,
    pub sync: SyncCfg,
    pub storage: StorageCfg,
    pub remote: RemoteCfg,
    pub display: DisplayCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a recorded motion trace. Headers must be exactly `x,y,z`.
pub fn load_trace_csv(path: &std::path::Path) -> eyre::Result<Vec<TraceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open trace CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["x", "y", "z"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "trace CSV must have headers 'x,y,z', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        match rec {
            Ok(row) => {
                if !(row.x.is_finite() && row.y.is_finite() && row.z.is_finite()) {
                    eyre::bail!("non-finite value in trace CSV row {}", idx + 2);
                }
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("trace CSV {:?} has no samples", path);
    }
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sensor
        if self.sensor.sample_rate_hz == 0 || self.sensor.sample_rate_hz > 200 {
            eyre::bail!("sensor.sample_rate_hz must be in 1..=200");
        }
        if self.sensor.read_timeout_ms == 0 {
            eyre::bail!("sensor.read_timeout_ms must be >= 1");
        }

        // Detector
        if !self.detector.threshold.is_finite() || self.detector.threshold <= 0.0 {
            eyre::bail!("detector.threshold must be a finite value > 0");
        }
        if self.detector.cooldown_ms == 0 || self.detector.cooldown_ms > 10_000 {
            eyre::bail!("detector.cooldown_ms must be in 1..=10000");
        }
        if !(self.detector.stride_m > 0.0 && self.detector.stride_m <= 3.0) {
            eyre::bail!("detector.stride_m must be in (0.0, 3.0]");
        }

        // Sync
        if self.sync.interval_ms == 0 {
            eyre::bail!("sync.interval_ms must be >= 1");
        }
        if self.sync.headless_budget_ms == 0 {
            eyre::bail!("sync.headless_budget_ms must be >= 1");
        }
        if self.sync.host_interval_ms == 0 {
            eyre::bail!("sync.host_interval_ms must be >= 1");
        }

        // Storage
        if self.storage.snapshot_path.as_os_str().is_empty() {
            eyre::bail!("storage.snapshot_path must not be empty");
        }
        if self.storage.persist_interval_ms == 0 {
            eyre::bail!("storage.persist_interval_ms must be >= 1");
        }

        // Remote
        if self.remote.path.as_os_str().is_empty() {
            eyre::bail!("remote.path must not be empty");
        }

        // Display
        if self.display.daily_step_goal == 0 {
            eyre::bail!("display.daily_step_goal must be >= 1");
        }

        Ok(())
    }
}
