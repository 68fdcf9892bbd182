//! In-process stand-in for the OS background scheduler.
//!
//! Each registered task gets its own thread that wakes it every `interval`,
//! grants it `budget`, and waits for the completion signal. A task that
//! overruns its budget is throttled: its interval doubles, up to
//! `MAX_THROTTLE` times the base interval. A task that completes in time
//! returns to the base interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use stepsync_traits::{BackgroundHost, BackgroundTask, BoxError, Completion, TaskId, TaskOutcome};

const MAX_THROTTLE: u32 = 8;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-task counters, readable while the task is registered.
#[derive(Debug, Default)]
pub struct TaskStats {
    pub invocations: AtomicU64,
    pub overruns: AtomicU64,
    pub failures: AtomicU64,
}

struct Worker {
    cancel: Option<xch::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    stats: Arc<TaskStats>,
}

pub struct ThreadHost {
    interval: Duration,
    budget: Duration,
    next_id: AtomicU64,
    workers: Mutex<HashMap<TaskId, Worker>>,
}

impl ThreadHost {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            budget: budget.max(Duration::from_millis(1)),
            next_id: AtomicU64::new(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self, id: TaskId) -> Option<Arc<TaskStats>> {
        self.workers
            .lock()
            .ok()
            .and_then(|w| w.get(&id).map(|worker| worker.stats.clone()))
    }

    pub fn registered(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn spawn_worker(&self, id: TaskId, task: Arc<dyn BackgroundTask>) -> Worker {
        let (cancel_tx, cancel_rx) = xch::bounded::<()>(1);
        let stats = Arc::new(TaskStats::default());
        let stats_bg = stats.clone();
        let base = self.interval;
        let budget = self.budget;

        let join_handle = std::thread::spawn(move || {
            let mut interval = base;
            loop {
                match cancel_rx.recv_timeout(interval) {
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    // Explicit cancel or host dropped
                    _ => break,
                }

                let (done_tx, done_rx) = xch::bounded(1);
                let done = Completion::new(move |outcome| {
                    let _ = done_tx.send(outcome);
                });
                stats_bg.invocations.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let runner = task.clone();
                // The task runs detached so an overrunning task cannot stall the host.
                std::thread::spawn(move || runner.run(budget, done));

                match done_rx.recv_timeout(budget) {
                    Ok(outcome) => {
                        if outcome == TaskOutcome::Failed {
                            stats_bg.failures.fetch_add(1, Ordering::Relaxed);
                        }
                        tracing::debug!(
                            task = task.name(),
                            task_id = id,
                            ?outcome,
                            elapsed_ms = millis(started.elapsed()),
                            "background task completed"
                        );
                        interval = base;
                    }
                    Err(_) => {
                        stats_bg.overruns.fetch_add(1, Ordering::Relaxed);
                        interval = (interval * 2).min(base * MAX_THROTTLE);
                        tracing::warn!(
                            task = task.name(),
                            task_id = id,
                            budget_ms = millis(budget),
                            next_interval_ms = millis(interval),
                            "background task overran its budget; throttling"
                        );
                    }
                }
            }
            tracing::trace!(task_id = id, "host worker exiting");
        });

        Worker {
            cancel: Some(cancel_tx),
            join_handle: Some(join_handle),
            stats,
        }
    }
}

impl BackgroundHost for ThreadHost {
    fn register(&self, task: Arc<dyn BackgroundTask>) -> Result<TaskId, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = task.name().to_string();
        let worker = self.spawn_worker(id, task);
        let mut workers = self
            .workers
            .lock()
            .map_err(|_| -> BoxError { "host registry poisoned".into() })?;
        workers.insert(id, worker);
        tracing::info!(task = %name, task_id = id, "background task registered");
        Ok(id)
    }

    fn unregister(&self, id: TaskId) {
        let worker = self.workers.lock().ok().and_then(|mut w| w.remove(&id));
        if let Some(mut worker) = worker {
            // Dropping the sender wakes the worker out of its wait.
            worker.cancel.take();
            if let Some(handle) = worker.join_handle.take()
                && handle.join().is_err()
            {
                tracing::warn!(task_id = id, "host worker panicked");
            }
            tracing::info!(task_id = id, "background task unregistered");
        }
    }
}

impl Drop for ThreadHost {
    fn drop(&mut self) {
        let ids: Vec<TaskId> = self
            .workers
            .lock()
            .map(|w| w.keys().copied().collect())
            .unwrap_or_default();
        for id in ids {
            self.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quick;
    impl BackgroundTask for Quick {
        fn name(&self) -> &str {
            "quick"
        }
        fn run(&self, _budget: Duration, done: Completion) {
            done.finish(TaskOutcome::NewData);
        }
    }

    struct Stuck;
    impl BackgroundTask for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        fn run(&self, _budget: Duration, done: Completion) {
            std::thread::sleep(Duration::from_millis(200));
            done.finish(TaskOutcome::NoData);
        }
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn invokes_until_unregistered() {
        let host = ThreadHost::new(Duration::from_millis(10), Duration::from_millis(100));
        let id = host.register(Arc::new(Quick)).unwrap();
        let stats = host.stats(id).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        host.unregister(id);
        let seen = stats.invocations.load(Ordering::Relaxed);
        assert!(seen >= 2, "expected repeated invocations, got {seen}");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(stats.invocations.load(Ordering::Relaxed), seen);
        assert_eq!(host.registered(), 0);
    }

    #[test]
    fn overrunning_task_is_counted() {
        let host = ThreadHost::new(Duration::from_millis(5), Duration::from_millis(10));
        let id = host.register(Arc::new(Stuck)).unwrap();
        let stats = host.stats(id).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        host.unregister(id);
        assert!(stats.overruns.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn unregister_unknown_id_is_noop() {
        let host = ThreadHost::new(Duration::from_millis(10), Duration::from_millis(10));
        host.unregister(999);
        assert_eq!(host.registered(), 0);
    }
}
