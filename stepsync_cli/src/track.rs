//! Foreground session and the headless entry point.

use std::io::BufRead;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{self as xch, select};
use eyre::Result;
use serde_json::json;
use stepsync_config::Config;
use stepsync_core::{
    AppState, HeadlessOutcome, LifecycleCoordinator, SyncReport, TrackerError, register_headless,
};
use stepsync_hardware::ThreadHost;
use stepsync_traits::BackgroundHost;
use stepsync_ui::DisplayBinding;

use crate::app::{build_scheduler, make_sensor};
use crate::cli::SensorArgs;

/// Longest a `sync` typed at the prompt is waited for.
const INTERACTIVE_SYNC_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Foreground,
    Background,
    Sync,
    Reset,
    Show,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    match line.trim().to_ascii_lowercase().as_str() {
        "fg" | "foreground" => Some(Input::Foreground),
        "bg" | "background" => Some(Input::Background),
        "sync" => Some(Input::Sync),
        "reset" => Some(Input::Reset),
        "show" | "" => Some(Input::Show),
        "quit" | "exit" | "q" => Some(Input::Quit),
        _ => None,
    }
}

/// Forward stdin lines until EOF. The thread is left detached: a blocked
/// read cannot be interrupted.
fn spawn_stdin_reader() -> xch::Receiver<String> {
    let (tx, rx) = xch::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn print_metrics(coordinator: &LifecycleCoordinator, goal: u64, json_mode: bool) -> Result<()> {
    let binding = DisplayBinding::new(coordinator, goal);
    if json_mode {
        let out = json!({
            "status": coordinator.status().to_string(),
            "metrics": binding.get_metrics_data()?,
        });
        println!("{out}");
    } else {
        println!("status: {}", coordinator.status());
        print!("{}", binding.render()?);
    }
    Ok(())
}

fn report_sync(report: Result<SyncReport, xch::RecvTimeoutError>, json_mode: bool) {
    let line = match report {
        Ok(SyncReport::Completed(snap)) => {
            if json_mode {
                json!({ "sync": "completed", "metrics": snap }).to_string()
            } else {
                format!("sync completed: steps={:.0}", snap.get("Steps"))
            }
        }
        Ok(SyncReport::Failed(e)) => {
            if json_mode {
                json!({ "sync": "failed", "error": e.to_string() }).to_string()
            } else {
                format!("sync failed: {e}")
            }
        }
        Ok(SyncReport::Skipped(why)) => {
            if json_mode {
                json!({ "sync": "skipped", "reason": why }).to_string()
            } else {
                format!("sync skipped: {why}")
            }
        }
        Err(_) => {
            if json_mode {
                json!({ "sync": "pending" }).to_string()
            } else {
                "sync still running; result will land in the background".to_string()
            }
        }
    };
    println!("{line}");
}

pub fn track(
    cfg: &Config,
    args: &SensorArgs,
    duration_ms: Option<u64>,
    json_mode: bool,
) -> Result<()> {
    let scheduler = build_scheduler(cfg, make_sensor(cfg, args)?)?;
    let coordinator = Arc::new(LifecycleCoordinator::new(scheduler));
    coordinator.launch()?;

    let host: Arc<dyn BackgroundHost> = Arc::new(ThreadHost::new(
        Duration::from_millis(cfg.sync.host_interval_ms),
        Duration::from_millis(cfg.sync.headless_budget_ms),
    ));
    let mut registration = register_headless(host.clone(), coordinator.clone())?;

    let (app_tx, app_rx) = xch::unbounded::<AppState>();
    let mut listener = coordinator.listen(app_rx);
    let _ = app_tx.send(AppState::Foreground);

    let (sig_tx, sig_rx) = xch::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    })
    .map_err(|e| eyre::eyre!("install Ctrl-C handler: {e}"))?;

    let deadline = match duration_ms {
        Some(ms) => xch::after(Duration::from_millis(ms)),
        None => xch::never(),
    };
    let lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let goal = cfg.display.daily_step_goal;
    tracing::info!(duration_ms = ?duration_ms, "tracking session started");

    loop {
        let line_rx = if stdin_open {
            lines.clone()
        } else {
            xch::never()
        };
        select! {
            recv(sig_rx) -> _ => {
                tracing::info!("interrupted; shutting down");
                break;
            }
            recv(deadline) -> _ => {
                tracing::info!("session duration elapsed");
                break;
            }
            recv(line_rx) -> msg => {
                let line = match msg {
                    Ok(l) => l,
                    Err(_) => {
                        // EOF: keep running until the deadline, if there is one.
                        if duration_ms.is_none() {
                            break;
                        }
                        stdin_open = false;
                        continue;
                    }
                };
                match parse_input(&line) {
                    Some(Input::Foreground) => {
                        let _ = app_tx.send(AppState::Foreground);
                    }
                    Some(Input::Background) => {
                        let _ = app_tx.send(AppState::Background);
                    }
                    Some(Input::Sync) => {
                        let reports = coordinator.scheduler().request_sync();
                        report_sync(reports.recv_timeout(INTERACTIVE_SYNC_WAIT), json_mode);
                    }
                    Some(Input::Reset) => match coordinator.scheduler().reset() {
                        Ok(entry) => println!(
                            "archived epoch {}: steps={:.0}",
                            entry.epoch,
                            entry.snapshot.get("Steps")
                        ),
                        Err(e) => println!("reset failed: {e}"),
                    },
                    Some(Input::Show) => print_metrics(&coordinator, goal, json_mode)?,
                    Some(Input::Quit) => break,
                    None => println!("unknown command {line:?}; try fg, bg, sync, reset, show, quit"),
                }
            }
        }
    }

    registration.cancel();
    listener.stop();
    drop(host);
    if let Err(e) = coordinator.scheduler().stop() {
        tracing::warn!(error = %e, "stop failed");
    }
    print_metrics(&coordinator, goal, json_mode)
}

pub fn headless(
    cfg: &Config,
    args: &SensorArgs,
    budget_ms: Option<u64>,
    json_mode: bool,
) -> Result<()> {
    let budget = Duration::from_millis(budget_ms.unwrap_or(cfg.sync.headless_budget_ms));
    let scheduler = build_scheduler(cfg, make_sensor(cfg, args)?)?;
    let coordinator = LifecycleCoordinator::new(scheduler);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| coordinator.on_headless(budget)))
        .unwrap_or_else(|_| {
            tracing::error!("headless invocation panicked");
            HeadlessOutcome::Failed(TrackerError::State("headless invocation panicked".into()))
        });
    let task_outcome = outcome.task_outcome();

    match &outcome {
        HeadlessOutcome::Synced(snap) => {
            if json_mode {
                let out = json!({ "outcome": format!("{task_outcome:?}"), "metrics": snap });
                println!("{out}");
            } else {
                println!("headless: synced, steps={:.0}", snap.get("Steps"));
            }
        }
        HeadlessOutcome::TrackingOnly => {
            if json_mode {
                println!("{}", json!({ "outcome": format!("{task_outcome:?}") }));
            } else {
                println!("headless: tracking, no sync within budget");
            }
        }
        HeadlessOutcome::Failed(_) => {}
    }
    drop(coordinator);
    match outcome {
        HeadlessOutcome::Failed(e) => Err(e.into()),
        _ => Ok(()),
    }
}
