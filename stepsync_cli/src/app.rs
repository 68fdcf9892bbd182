//! Composition root and the offline commands.
//!
//! Every command builds the same scheduler from the config; the ones that
//! only look at stored data call `initialize()` and never start the sensor.

use std::time::Duration;

use eyre::{Result, WrapErr};
use serde_json::json;
use stepsync_config::Config;
use stepsync_core::{
    BackgroundScheduler, JsonFileStore, SnapshotStore, TrackerCfg, TrackerError,
    available_metrics, coming_soon_metrics,
};
use stepsync_hardware::{FileRemoteStore, ReplaySensor, SimulatedWalker};
use stepsync_traits::{MotionSensor, MotionVector};
use stepsync_ui::{DisplayBinding, render_coming_soon};

use crate::cli::SensorArgs;

/// Default cadence of the simulated walker, in strides per second.
pub const DEFAULT_CADENCE_HZ: f32 = 1.8;

pub type BoxedSensor = Box<dyn MotionSensor + Send>;

pub fn make_sensor(cfg: &Config, args: &SensorArgs) -> Result<BoxedSensor> {
    if let Some(path) = &args.replay {
        let rows = stepsync_config::load_trace_csv(path)?;
        tracing::info!(path = ?path, samples = rows.len(), "replaying motion trace");
        let samples = rows
            .iter()
            .map(|r| MotionVector::new(r.x, r.y, r.z))
            .collect();
        return Ok(Box::new(ReplaySensor::new(samples)));
    }
    let cadence = args.cadence_hz.unwrap_or(DEFAULT_CADENCE_HZ);
    if !cadence.is_finite() || cadence < 0.0 {
        eyre::bail!("--cadence-hz must be a finite value >= 0");
    }
    Ok(Box::new(SimulatedWalker::new(
        cadence,
        cfg.sensor.sample_rate_hz,
    )))
}

pub fn build_scheduler(cfg: &Config, sensor: BoxedSensor) -> Result<BackgroundScheduler> {
    let scheduler = BackgroundScheduler::builder()
        .with_config(TrackerCfg::from(cfg))
        .with_sensor(sensor)
        .with_gateway(FileRemoteStore::new(&cfg.remote.path))
        .with_store(JsonFileStore::new(&cfg.storage.snapshot_path))
        .build()?;
    Ok(scheduler)
}

/// Scheduler over the stored snapshot, loaded but not tracking.
fn offline_scheduler(cfg: &Config) -> Result<BackgroundScheduler> {
    let sensor = make_sensor(cfg, &SensorArgs::default())?;
    let scheduler = build_scheduler(cfg, sensor)?;
    scheduler.initialize()?;
    Ok(scheduler)
}

pub fn metrics(cfg: &Config, json_mode: bool) -> Result<()> {
    let scheduler = offline_scheduler(cfg)?;
    let binding = DisplayBinding::new(&scheduler, cfg.display.daily_step_goal);
    if json_mode {
        let out = json!({
            "metrics": binding.get_metrics_data()?,
            "last_sync_ms": scheduler.last_sync_ms()?,
            "available": binding.get_available_metrics(),
            "coming_soon": binding.get_coming_soon_metrics(),
        });
        println!("{out}");
    } else {
        print!("{}", binding.render()?);
        println!(
            "Coming soon: {}",
            render_coming_soon(&binding.get_coming_soon_metrics())
        );
    }
    Ok(())
}

pub fn history(cfg: &Config, json_mode: bool) -> Result<()> {
    let scheduler = offline_scheduler(cfg)?;
    let entries = scheduler.history()?;
    if json_mode {
        println!("{}", serde_json::to_string(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No history yet.");
    }
    for e in &entries {
        println!(
            "epoch {:>3}  closed at {}  steps={:.0} distance={:.1}m",
            e.epoch,
            e.timestamp_ms,
            e.snapshot.get("Steps"),
            e.snapshot.get("Distance")
        );
    }
    Ok(())
}

pub fn reset(cfg: &Config, json_mode: bool) -> Result<()> {
    // The new epoch is on disk once reset returns.
    let entry = offline_scheduler(cfg)?.reset()?;
    if json_mode {
        println!("{}", serde_json::to_string(&entry)?);
    } else {
        println!(
            "Archived epoch {}: steps={:.0} distance={:.1}m",
            entry.epoch,
            entry.snapshot.get("Steps"),
            entry.snapshot.get("Distance")
        );
    }
    Ok(())
}

pub fn self_check(cfg: &Config, args: &SensorArgs, json_mode: bool) -> Result<()> {
    let timeout = Duration::from_millis(cfg.sensor.read_timeout_ms);
    let mut sensor = make_sensor(cfg, args)?;
    sensor
        .open()
        .map_err(|e| TrackerError::SensorUnavailable(e.to_string()))?;
    let probe = sensor.read(timeout);
    sensor.close();
    let reading = probe.map_err(|e| TrackerError::SensorUnavailable(e.to_string()))?;

    let stored = JsonFileStore::new(&cfg.storage.snapshot_path).load()?;
    let remote = FileRemoteStore::new(&cfg.remote.path)
        .document()
        .map_err(|e| TrackerError::SyncFailure(e.to_string()))?;

    if json_mode {
        let out = json!({
            "ok": true,
            "sensor_magnitude": reading.magnitude(),
            "snapshot_present": stored.is_some(),
            "remote_epoch": remote.epoch,
        });
        println!("{out}");
    } else {
        println!("sensor:   ok (|a| = {:.3} g)", reading.magnitude());
        println!(
            "snapshot: ok ({})",
            if stored.is_some() { "present" } else { "empty" }
        );
        println!("remote:   ok (epoch {})", remote.epoch);
    }
    Ok(())
}

/// Health never fails on unreadable data; it reports it.
pub fn health(cfg: &Config) -> Result<()> {
    let stored = JsonFileStore::new(&cfg.storage.snapshot_path).load();
    let remote = FileRemoteStore::new(&cfg.remote.path).document();

    let snapshot = match &stored {
        Ok(Some(s)) => json!({
            "readable": true,
            "epoch": s.epoch,
            "steps": s.values.get("Steps").copied().unwrap_or(0.0),
            "last_sync_ms": s.last_sync_ms,
            "history_len": s.history.len(),
        }),
        Ok(None) => json!({ "readable": true, "epoch": null }),
        Err(e) => json!({ "readable": false, "error": e.to_string() }),
    };
    let remote_obj = match &remote {
        Ok(doc) => json!({ "readable": true, "epoch": doc.epoch }),
        Err(e) => json!({ "readable": false, "error": e.to_string() }),
    };
    let healthy = stored.is_ok() && remote.is_ok();
    let out = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "snapshot_path": cfg.storage.snapshot_path,
        "remote_path": cfg.remote.path,
        "snapshot": snapshot,
        "remote": remote_obj,
        "tracked_metrics": available_metrics().iter().map(|d| d.name).collect::<Vec<_>>(),
        "coming_soon": coming_soon_metrics().len(),
    });
    println!("{out}");
    Ok(())
}

/// Read and validate the config file, or fall back to defaults.
pub fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(p) => stepsync_config::load_file(p).wrap_err("invalid configuration"),
        None => Ok(Config::default()),
    }
}
