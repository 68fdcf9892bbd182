//! Durable storage for the metrics snapshot.
//!
//! `SnapshotStore` is the seam; `JsonFileStore` is the production backend
//! and `MemoryStore` the in-process one. `PersistWorker` moves writes off
//! the session thread: jobs run in FIFO order, so a flush always lands
//! after every write queued before it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel as xch;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::metrics::MetricsHistoryEntry;

pub const FORMAT_VERSION: u32 = 1;

/// Everything that must survive a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMetrics {
    pub version: u32,
    pub epoch: u64,
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub history: Vec<MetricsHistoryEntry>,
    #[serde(default)]
    pub last_sync_ms: Option<u64>,
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, state: &PersistedMetrics) -> Result<(), TrackerError>;
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<PersistedMetrics>, TrackerError>;
}

pub type SharedStore = Arc<dyn SnapshotStore>;

/// JSON document on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, state: &PersistedMetrics) -> Result<(), TrackerError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| TrackerError::PersistenceFailure(format!("encode snapshot: {e}")))?;
        crate::util::write_atomic(&self.path, &bytes).map_err(|e| {
            TrackerError::PersistenceFailure(format!("write {}: {e}", self.path.display()))
        })
    }

    fn load(&self) -> Result<Option<PersistedMetrics>, TrackerError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TrackerError::PersistenceFailure(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let state: PersistedMetrics = serde_json::from_slice(&bytes).map_err(|e| {
            TrackerError::PersistenceFailure(format!("decode {}: {e}", self.path.display()))
        })?;
        if state.version != FORMAT_VERSION {
            return Err(TrackerError::PersistenceFailure(format!(
                "unsupported snapshot version {}",
                state.version
            )));
        }
        Ok(Some(state))
    }
}

/// Volatile store. Clones share contents, which lets a test play the part of
/// the disk across a simulated restart. Writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: Option<PersistedMetrics>,
    fail_writes: bool,
    saves: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut g) = self.inner.lock() {
            g.fail_writes = fail;
        }
    }

    pub fn saves(&self) -> u64 {
        self.inner.lock().map(|g| g.saves).unwrap_or(0)
    }

    pub fn contents(&self) -> Option<PersistedMetrics> {
        self.inner.lock().ok().and_then(|g| g.state.clone())
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, state: &PersistedMetrics) -> Result<(), TrackerError> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| TrackerError::PersistenceFailure("store lock poisoned".into()))?;
        if g.fail_writes {
            return Err(TrackerError::PersistenceFailure("disk full".into()));
        }
        g.state = Some(state.clone());
        g.saves += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedMetrics>, TrackerError> {
        let g = self
            .inner
            .lock()
            .map_err(|_| TrackerError::PersistenceFailure("store lock poisoned".into()))?;
        Ok(g.state.clone())
    }
}

pub(crate) enum PersistJob {
    Write(PersistedMetrics),
    Flush(PersistedMetrics, xch::Sender<Result<(), TrackerError>>),
}

/// Result of a background write, reported back to the session thread.
pub(crate) type PersistReport = Result<u64, TrackerError>;

/// Writer thread owning a handle to the store.
pub(crate) struct PersistWorker {
    jobs: Option<xch::Sender<PersistJob>>,
    join_handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
    pub(crate) fn spawn(store: SharedStore, reports: xch::Sender<PersistReport>) -> Self {
        let (tx, rx) = xch::unbounded::<PersistJob>();
        let join_handle = std::thread::spawn(move || {
            for job in rx {
                match job {
                    PersistJob::Write(state) => {
                        let epoch = state.epoch;
                        let res = store.save(&state).map(|()| epoch);
                        // Queued writes still land after the session is gone.
                        let _ = reports.send(res);
                    }
                    PersistJob::Flush(state, reply) => {
                        let _ = reply.send(store.save(&state));
                    }
                }
            }
            tracing::trace!("persist worker exiting");
        });
        Self {
            jobs: Some(tx),
            join_handle: Some(join_handle),
        }
    }

    pub(crate) fn write(&self, state: PersistedMetrics) {
        if let Some(jobs) = &self.jobs
            && jobs.send(PersistJob::Write(state)).is_err()
        {
            tracing::warn!("persist worker gone; snapshot not written");
        }
    }

    /// Queue a write and wait until it (and everything before it) is on disk.
    pub(crate) fn flush(&self, state: PersistedMetrics) -> Result<(), TrackerError> {
        let (reply_tx, reply_rx) = xch::bounded(1);
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| TrackerError::PersistenceFailure("persist worker stopped".into()))?;
        jobs.send(PersistJob::Flush(state, reply_tx))
            .map_err(|_| TrackerError::PersistenceFailure("persist worker gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| TrackerError::PersistenceFailure("persist worker gone".into()))?
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("persist worker panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PersistedMetrics {
        PersistedMetrics {
            version: FORMAT_VERSION,
            epoch: 2,
            values: [("Steps".to_string(), 120.0), ("Distance".to_string(), 90.0)]
                .into_iter()
                .collect(),
            history: Vec::new(),
            last_sync_ms: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn json_store_round_trip_and_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        assert_eq!(store.load().unwrap(), None);
        store.save(&sample_state()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_state()));
    }

    #[test]
    fn json_store_rejects_corrupt_and_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(TrackerError::PersistenceFailure(_))
        ));

        let mut state = sample_state();
        state.version = 99;
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot version 99"));
    }

    #[test]
    fn memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.save(&sample_state()).is_err());
        store.fail_writes(false);
        store.save(&sample_state()).unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(store.contents(), Some(sample_state()));
    }

    #[test]
    fn worker_flush_lands_after_queued_writes() {
        let store = MemoryStore::new();
        let (tx, rx) = xch::unbounded();
        let worker = PersistWorker::spawn(Arc::new(store.clone()), tx);
        let mut older = sample_state();
        older.epoch = 1;
        worker.write(older);
        worker.flush(sample_state()).unwrap();
        assert_eq!(store.contents().unwrap().epoch, 2);
        assert_eq!(rx.recv().unwrap(), Ok(1));
    }
}
