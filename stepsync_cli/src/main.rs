mod app;
mod cli;
mod error_fmt;
mod track;

use clap::Parser;
use eyre::{Result, WrapErr};
use stepsync_config::{Logging, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<()> {
    // Console goes to stderr; stdout is reserved for command output.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let mut layers = Vec::new();
    if json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(path) = &logging.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file {path:?} has no file name"))?;
        std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {dir:?}"))?;
        let appender = match logging.rotation {
            Rotation::Never => tracing_appender::rolling::never(dir, file_name),
            Rotation::Daily => tracing_appender::rolling::daily(dir, file_name),
            Rotation::Hourly => tracing_appender::rolling::hourly(dir, file_name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))
}

fn run(cli: Cli) -> Result<()> {
    let cfg = app::load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(cli.json, &level, &cfg.logging)?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    match &cli.cmd {
        Commands::Track {
            duration_ms,
            sensor,
        } => track::track(&cfg, sensor, *duration_ms, cli.json),
        Commands::Headless { budget_ms, sensor } => {
            track::headless(&cfg, sensor, *budget_ms, cli.json)
        }
        Commands::Metrics => app::metrics(&cfg, cli.json),
        Commands::History => app::history(&cfg, cli.json),
        Commands::Reset => app::reset(&cfg, cli.json),
        Commands::SelfCheck { sensor } => app::self_check(&cfg, sensor, cli.json),
        Commands::Health => app::health(&cfg),
    }
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
