//! The authoritative in-process metrics snapshot.
//!
//! Two writers exist: step increments (`record`) and the sync merge
//! (`merge_remote`). The cache is owned by the session thread, which
//! serializes both, so no locking happens here.
//!
//! Counters never decrease within an epoch. `reset` is the only way down:
//! it archives the current values, zeroes them and opens a new epoch.

use stepsync_traits::RemoteSnapshot;

use crate::error::TrackerError;
use crate::metrics::{MetricSample, MetricsHistoryEntry, MetricsSnapshot, tracked_metric_names};
use crate::store::{FORMAT_VERSION, PersistedMetrics, SharedStore};

/// What a merge did to the local snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Same epoch on both sides; `raised` counters took the remote value.
    Merged { raised: usize },
    /// Remote predates a local reset; local values stand and should be pushed.
    LocalAuthoritative { remote_epoch: u64 },
    /// Remote was reset elsewhere; its values and epoch replaced ours.
    AdoptedRemote { discarded: MetricsSnapshot },
}

pub struct LocalMetricsCache {
    store: SharedStore,
    values: MetricsSnapshot,
    epoch: u64,
    history: Vec<MetricsHistoryEntry>,
    last_sync_ms: Option<u64>,
    dirty: bool,
}

fn valid(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

impl LocalMetricsCache {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            values: MetricsSnapshot::zeroed(),
            epoch: 0,
            history: Vec::new(),
            last_sync_ms: None,
            dirty: false,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name)
    }

    /// Overwrite one value. Negative and non-finite values are rejected, as
    /// is anything below the current value: only `reset` lowers a counter.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), TrackerError> {
        if !valid(value) {
            return Err(TrackerError::State(format!(
                "{name} must be finite and >= 0, got {value}"
            )));
        }
        let current = self.values.get(name);
        if value < current {
            return Err(TrackerError::State(format!(
                "{name} cannot decrease within epoch {} ({current} -> {value})",
                self.epoch
            )));
        }
        self.values.insert(name, value);
        self.dirty = true;
        Ok(())
    }

    pub fn get_all(&self) -> MetricsSnapshot {
        self.values.clone()
    }

    /// Apply one increment. Returns the new value.
    pub fn record(&mut self, sample: &MetricSample) -> Result<f64, TrackerError> {
        if !valid(sample.value) {
            return Err(TrackerError::State(format!(
                "increment for {} must be finite and >= 0, got {}",
                sample.metric_name, sample.value
            )));
        }
        let next = self.values.get(sample.metric_name) + sample.value;
        self.values.insert(sample.metric_name, next);
        self.dirty = true;
        Ok(next)
    }

    /// Close the current epoch: archive the live values exactly once and
    /// zero every counter.
    pub fn reset(&mut self, now_ms: u64) -> MetricsHistoryEntry {
        let entry = MetricsHistoryEntry {
            timestamp_ms: now_ms,
            epoch: self.epoch,
            snapshot: self.values.clone(),
        };
        self.history.push(entry.clone());

        let mut zeroed = MetricsSnapshot::zeroed();
        for (name, _) in self.values.iter() {
            zeroed.insert(name, 0.0);
        }
        self.values = zeroed;
        self.epoch = self.epoch.saturating_add(1);
        self.dirty = true;
        tracing::info!(
            epoch = self.epoch,
            archived_steps = entry.snapshot.get("Steps"),
            "metrics reset"
        );
        entry
    }

    pub fn history(&self) -> &[MetricsHistoryEntry] {
        &self.history
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sync cursor: wall-clock ms of the last fully successful sync.
    pub fn last_sync_ms(&self) -> Option<u64> {
        self.last_sync_ms
    }

    pub fn mark_synced(&mut self, now_ms: u64) {
        self.last_sync_ms = Some(now_ms);
        self.dirty = true;
    }

    /// Reconcile with values pulled from the remote store.
    ///
    /// Epochs decide first, values second: a remote from an older epoch
    /// never touches local counters, a remote from a newer epoch replaces
    /// them, and within the same epoch each counter takes the larger value.
    pub fn merge_remote(&mut self, remote: &RemoteSnapshot) -> MergeOutcome {
        if remote.epoch < self.epoch {
            tracing::debug!(
                local_epoch = self.epoch,
                remote_epoch = remote.epoch,
                "remote predates local reset; keeping local values"
            );
            return MergeOutcome::LocalAuthoritative {
                remote_epoch: remote.epoch,
            };
        }

        if remote.epoch > self.epoch {
            let discarded = self.values.clone();
            let mut adopted = MetricsSnapshot::zeroed();
            for name in tracked_metric_names() {
                if let Some(v) = remote.values.get(&name).copied().filter(|v| valid(*v)) {
                    adopted.insert(&name, v);
                }
            }
            tracing::info!(
                local_epoch = self.epoch,
                remote_epoch = remote.epoch,
                discarded_steps = discarded.get("Steps"),
                "remote was reset elsewhere; adopting remote values"
            );
            self.values = adopted;
            self.epoch = remote.epoch;
            self.dirty = true;
            return MergeOutcome::AdoptedRemote { discarded };
        }

        let mut raised = 0;
        for name in tracked_metric_names() {
            let Some(theirs) = remote.values.get(&name).copied() else {
                continue;
            };
            if !valid(theirs) {
                tracing::warn!(metric = %name, value = theirs, "ignoring invalid remote value");
                continue;
            }
            if theirs > self.values.get(&name) {
                self.values.insert(&name, theirs);
                raised += 1;
            }
        }
        if raised > 0 {
            self.dirty = true;
        }
        MergeOutcome::Merged { raised }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Schedule another write, e.g. after a background write failed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn to_persisted(&self) -> PersistedMetrics {
        PersistedMetrics {
            version: FORMAT_VERSION,
            epoch: self.epoch,
            values: self.values.as_map().clone(),
            history: self.history.clone(),
            last_sync_ms: self.last_sync_ms,
        }
    }

    /// Durable write of the whole state.
    pub fn persist(&mut self) -> Result<(), TrackerError> {
        self.store.save(&self.to_persisted())?;
        self.dirty = false;
        Ok(())
    }

    /// Durable read. Returns `Ok(false)` when the store is empty, leaving the
    /// cache untouched.
    pub fn load(&mut self) -> Result<bool, TrackerError> {
        let Some(state) = self.store.load()? else {
            return Ok(false);
        };
        self.restore(state);
        tracing::info!(
            epoch = self.epoch,
            steps = self.values.get("Steps"),
            "metrics restored"
        );
        Ok(true)
    }

    /// Replace the whole state, e.g. to undo a reset that never reached disk.
    /// Leaves the cache clean.
    pub fn restore(&mut self, state: PersistedMetrics) {
        let mut values = MetricsSnapshot::zeroed();
        for (name, v) in &state.values {
            if valid(*v) {
                values.insert(name, *v);
            } else {
                tracing::warn!(metric = %name, value = *v, "dropping invalid persisted value");
            }
        }
        self.values = values;
        self.epoch = state.epoch;
        self.history = state.history;
        self.last_sync_ms = state.last_sync_ms;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn cache() -> LocalMetricsCache {
        LocalMetricsCache::new(Arc::new(MemoryStore::new()))
    }

    fn step(value: f64) -> MetricSample {
        MetricSample {
            metric_name: "Steps",
            value,
            timestamp_ms: 0,
        }
    }

    fn remote(epoch: u64, steps: f64) -> RemoteSnapshot {
        RemoteSnapshot {
            epoch,
            values: [("Steps".to_string(), steps)].into_iter().collect(),
        }
    }

    #[test]
    fn starts_zeroed_with_tracked_metrics() {
        let c = cache();
        assert_eq!(c.get_all(), MetricsSnapshot::from([("Distance", 0.0), ("Steps", 0.0)]));
        assert!(!c.is_dirty());
    }

    #[test]
    fn record_accumulates_and_rejects_negative() {
        let mut c = cache();
        assert_eq!(c.record(&step(1.0)).unwrap(), 1.0);
        assert_eq!(c.record(&step(1.0)).unwrap(), 2.0);
        assert!(c.record(&step(-1.0)).is_err());
        assert!(c.record(&step(f64::NAN)).is_err());
        assert_eq!(c.get("Steps"), 2.0);
    }

    #[test]
    fn set_validates_value() {
        let mut c = cache();
        c.set("Steps", 10.0).unwrap();
        assert!(matches!(c.set("Steps", -5.0), Err(TrackerError::State(_))));
        assert!(c.set("Steps", f64::INFINITY).is_err());
        assert_eq!(c.get("Steps"), 10.0);
    }

    #[test]
    fn set_never_lowers_a_counter() {
        let mut c = cache();
        c.set("Steps", 120.0).unwrap();
        c.set("Steps", 120.0).unwrap();
        assert!(matches!(c.set("Steps", 10.0), Err(TrackerError::State(_))));
        assert_eq!(c.get("Steps"), 120.0);
        assert_eq!(c.epoch(), 0);

        // A reset is the way down.
        c.reset(1);
        c.set("Steps", 10.0).unwrap();
        assert_eq!(c.get("Steps"), 10.0);
    }

    #[test]
    fn merge_never_regresses_local() {
        let mut c = cache();
        c.set("Steps", 120.0).unwrap();
        assert_eq!(
            c.merge_remote(&remote(0, 100.0)),
            MergeOutcome::Merged { raised: 0 }
        );
        assert_eq!(c.get("Steps"), 120.0);
    }

    #[test]
    fn merge_raises_to_remote_when_larger() {
        let mut c = cache();
        c.set("Steps", 120.0).unwrap();
        c.mark_clean();
        assert_eq!(
            c.merge_remote(&remote(0, 300.0)),
            MergeOutcome::Merged { raised: 1 }
        );
        assert_eq!(c.get("Steps"), 300.0);
        assert!(c.is_dirty());
    }

    #[test]
    fn stale_remote_after_reset_is_ignored() {
        let mut c = cache();
        c.set("Steps", 4200.0).unwrap();
        c.reset(1);
        c.record(&step(1.0)).unwrap();
        let outcome = c.merge_remote(&remote(0, 4200.0));
        assert_eq!(outcome, MergeOutcome::LocalAuthoritative { remote_epoch: 0 });
        assert_eq!(c.get("Steps"), 1.0);
    }

    #[test]
    fn newer_remote_epoch_wins_even_when_lower() {
        let mut c = cache();
        c.set("Steps", 500.0).unwrap();
        let outcome = c.merge_remote(&remote(3, 20.0));
        assert_eq!(
            outcome,
            MergeOutcome::AdoptedRemote {
                discarded: MetricsSnapshot::from([("Distance", 0.0), ("Steps", 500.0)])
            }
        );
        assert_eq!(c.epoch(), 3);
        assert_eq!(c.get("Steps"), 20.0);
        assert_eq!(c.get("Distance"), 0.0);
    }

    #[test]
    fn merge_ignores_untracked_and_invalid_remote_values() {
        let mut c = cache();
        let r = RemoteSnapshot {
            epoch: 0,
            values: [
                ("Calories".to_string(), 900.0),
                ("Distance".to_string(), f64::NAN),
            ]
            .into_iter()
            .collect(),
        };
        assert_eq!(c.merge_remote(&r), MergeOutcome::Merged { raised: 0 });
        assert_eq!(c.get("Calories"), 0.0);
        assert_eq!(c.get("Distance"), 0.0);
    }

    #[test]
    fn reset_archives_once_and_opens_new_epoch() {
        let mut c = cache();
        c.set("Steps", 4200.0).unwrap();
        c.set("Distance", 3150.0).unwrap();
        let entry = c.reset(1_000);
        assert_eq!(
            entry.snapshot,
            MetricsSnapshot::from([("Distance", 3150.0), ("Steps", 4200.0)])
        );
        assert_eq!(entry.epoch, 0);
        assert_eq!(c.history(), &[entry]);
        assert_eq!(c.get_all(), MetricsSnapshot::from([("Distance", 0.0), ("Steps", 0.0)]));
        assert_eq!(c.epoch(), 1);
    }

    #[test]
    fn persist_and_load_round_trip() {
        let store = MemoryStore::new();
        let mut c = LocalMetricsCache::new(Arc::new(store.clone()));
        c.set("Steps", 77.0).unwrap();
        c.mark_synced(123);
        c.persist().unwrap();
        assert!(!c.is_dirty());

        let mut restarted = LocalMetricsCache::new(Arc::new(store));
        assert!(restarted.load().unwrap());
        assert_eq!(restarted.get_all(), c.get_all());
        assert_eq!(restarted.last_sync_ms(), Some(123));
    }

    #[test]
    fn load_from_empty_store_keeps_defaults() {
        let mut c = cache();
        assert!(!c.load().unwrap());
        assert_eq!(c.get("Steps"), 0.0);
    }

    #[test]
    fn persist_failure_keeps_dirty_flag() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let mut c = LocalMetricsCache::new(Arc::new(store));
        c.set("Steps", 1.0).unwrap();
        assert!(matches!(
            c.persist(),
            Err(TrackerError::PersistenceFailure(_))
        ));
        assert!(c.is_dirty());
        assert_eq!(c.get("Steps"), 1.0);
    }
}
