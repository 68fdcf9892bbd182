//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "stepsync", version, about = "Continuous step tracking with remote sync")]
pub struct Cli {
    /// Path to config TOML; all defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and print as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to [logging] level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Where motion readings come from.
#[derive(Args, Debug, Clone, Default)]
pub struct SensorArgs {
    /// Cadence of the simulated walker, in strides per second
    #[arg(long, value_name = "HZ")]
    pub cadence_hz: Option<f32>,

    /// Replay a recorded trace (CSV with headers x,y,z) instead of simulating
    #[arg(long, value_name = "FILE", conflicts_with = "cadence_hz")]
    pub replay: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Foreground session; stdin lines fg, bg, sync, reset, show, quit drive it
    Track {
        /// Stop after this many milliseconds instead of waiting for quit
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,
        #[command(flatten)]
        sensor: SensorArgs,
    },
    /// One headless invocation: ensure tracking, sync within the budget, exit
    Headless {
        /// Time granted by the host; defaults to sync.headless_budget_ms
        #[arg(long, value_name = "MS")]
        budget_ms: Option<u64>,
        #[command(flatten)]
        sensor: SensorArgs,
    },
    /// Print the persisted metrics and the metric catalog
    Metrics,
    /// Print the archive of closed epochs
    History,
    /// Close the current epoch offline and print the archived entry
    Reset,
    /// Probe the motion source, the snapshot store and the remote store
    SelfCheck {
        #[command(flatten)]
        sensor: SensorArgs,
    },
    /// Health summary for operational monitoring (JSON)
    Health,
}
