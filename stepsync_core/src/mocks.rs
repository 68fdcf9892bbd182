//! Deterministic doubles for the sensor, remote and host seams.
//!
//! Every double is `Clone` with shared state, so a test keeps one copy to
//! script and inspect while the scheduler owns the other.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel as xch;
use stepsync_traits::{
    BackgroundHost, BackgroundTask, BoxError, Completion, MotionSensor, MotionVector,
    RemoteSnapshot, RemoteSyncGateway, TaskId, TaskOutcome,
};

#[derive(Default)]
struct Feed {
    queue: Mutex<VecDeque<MotionVector>>,
    ready: Condvar,
}

/// Sensor replaying samples pushed by the test. An empty feed behaves like a
/// silent sensor: `read` waits out its timeout and fails.
#[derive(Clone, Default)]
pub struct ScriptedSensor {
    feed: Arc<Feed>,
    open_subscriptions: Arc<AtomicUsize>,
    opens: Arc<AtomicU64>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, v: MotionVector) {
        if let Ok(mut q) = self.feed.queue.lock() {
            q.push_back(v);
        }
        self.feed.ready.notify_all();
    }

    pub fn push_samples(&self, samples: impl IntoIterator<Item = MotionVector>) {
        if let Ok(mut q) = self.feed.queue.lock() {
            q.extend(samples);
        }
        self.feed.ready.notify_all();
    }

    /// Samples not yet read.
    pub fn remaining(&self) -> usize {
        self.feed.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Subscriptions currently open (opened and not yet closed).
    pub fn open_subscriptions(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }

    /// Total successful `open` calls.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MotionSensor for ScriptedSensor {
    fn open(&mut self) -> Result<(), BoxError> {
        self.open_subscriptions.fetch_add(1, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<MotionVector, BoxError> {
        let guard = self
            .feed
            .queue
            .lock()
            .map_err(|_| "scripted feed poisoned")?;
        let (mut queue, _) = self
            .feed
            .ready
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .map_err(|_| "scripted feed poisoned")?;
        queue.pop_front().ok_or_else(|| "no sample".into())
    }

    fn close(&mut self) {
        self.open_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sensor whose stream can never be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSensor;

impl MotionSensor for UnavailableSensor {
    fn open(&mut self) -> Result<(), BoxError> {
        Err("no motion sensor present".into())
    }

    fn read(&mut self, _timeout: Duration) -> Result<MotionVector, BoxError> {
        Err("no motion sensor present".into())
    }
}

#[derive(Debug, Default)]
struct RemoteInner {
    epoch: u64,
    values: BTreeMap<String, f64>,
    fail_next: u32,
    delay: Option<Duration>,
    pulls: u64,
    pushes: Vec<(String, f64, u64)>,
}

/// In-memory remote store with failure injection and a push log.
///
/// Follows the same epoch contract as a real remote: pushes tagged with an
/// older epoch are rejected, a newer epoch replaces all values.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote<const N: usize>(&self, epoch: u64, values: [(&str, f64); N]) {
        if let Ok(mut g) = self.inner.lock() {
            g.epoch = epoch;
            g.values = values
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        }
    }

    /// Simulate another device resetting the remote.
    pub fn external_reset(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.epoch += 1;
            g.values.values_mut().for_each(|v| *v = 0.0);
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.values.get(name).copied())
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().map(|g| g.epoch).unwrap_or(0)
    }

    /// Fail the next `n` pull/push calls.
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut g) = self.inner.lock() {
            g.fail_next = n;
        }
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut g) = self.inner.lock() {
            g.delay = delay;
        }
    }

    pub fn pulls(&self) -> u64 {
        self.inner.lock().map(|g| g.pulls).unwrap_or(0)
    }

    pub fn pushes(&self) -> Vec<(String, f64, u64)> {
        self.inner
            .lock()
            .map(|g| g.pushes.clone())
            .unwrap_or_default()
    }

    fn enter(&self) -> Result<(), BoxError> {
        let delay = {
            let mut g = self.inner.lock().map_err(|_| "remote poisoned")?;
            if g.fail_next > 0 {
                g.fail_next -= 1;
                return Err("remote offline".into());
            }
            g.delay
        };
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        Ok(())
    }
}

impl RemoteSyncGateway for MemoryRemote {
    fn pull(&mut self, metric_names: &[String]) -> Result<RemoteSnapshot, BoxError> {
        self.enter()?;
        let mut g = self.inner.lock().map_err(|_| "remote poisoned")?;
        g.pulls += 1;
        let values = metric_names
            .iter()
            .filter_map(|n| g.values.get(n).map(|v| (n.clone(), *v)))
            .collect();
        Ok(RemoteSnapshot {
            epoch: g.epoch,
            values,
        })
    }

    fn push(&mut self, metric_name: &str, value: f64, epoch: u64) -> Result<(), BoxError> {
        self.enter()?;
        let mut g = self.inner.lock().map_err(|_| "remote poisoned")?;
        if epoch < g.epoch {
            return Err(format!("stale epoch {epoch} < {}", g.epoch).into());
        }
        if epoch > g.epoch {
            g.epoch = epoch;
            g.values.clear();
        }
        g.values.insert(metric_name.to_string(), value);
        g.pushes.push((metric_name.to_string(), value, epoch));
        Ok(())
    }
}

/// Host that runs tasks only when the test says so.
#[derive(Default)]
pub struct ManualHost {
    tasks: Mutex<BTreeMap<TaskId, Arc<dyn BackgroundTask>>>,
    next_id: AtomicU64,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered(&self) -> Vec<TaskId> {
        self.tasks
            .lock()
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Invoke task `id` with `budget`, waiting at most that long for its
    /// completion. `None` means the task is unknown or overran.
    pub fn fire(&self, id: TaskId, budget: Duration) -> Option<TaskOutcome> {
        let task = self.tasks.lock().ok()?.get(&id).cloned()?;
        let (tx, rx) = xch::bounded(1);
        let done = Completion::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        std::thread::spawn(move || task.run(budget, done));
        rx.recv_timeout(budget).ok()
    }
}

impl BackgroundHost for ManualHost {
    fn register(&self, task: Arc<dyn BackgroundTask>) -> Result<TaskId, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tasks
            .lock()
            .map_err(|_| "host registry poisoned")?
            .insert(id, task);
        Ok(id)
    }

    fn unregister(&self, id: TaskId) {
        if let Ok(mut t) = self.tasks.lock() {
            t.remove(&id);
        }
    }
}
