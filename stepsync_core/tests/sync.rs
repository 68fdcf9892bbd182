mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{WAIT, rig, rig_with, steps, tracker_cfg, wait_until, walk};
use stepsync_core::mocks::MemoryRemote;
use stepsync_core::store::FORMAT_VERSION;
use stepsync_core::{
    MemoryStore, MetricsSnapshot, PersistedMetrics, SchedulerState, SnapshotStore, SyncCfg,
    SyncReport, TrackerError,
};

fn persisted(epoch: u64, steps: f64, distance: f64) -> PersistedMetrics {
    PersistedMetrics {
        version: FORMAT_VERSION,
        epoch,
        values: BTreeMap::from([
            ("Steps".to_string(), steps),
            ("Distance".to_string(), distance),
        ]),
        history: Vec::new(),
        last_sync_ms: None,
    }
}

fn sync(r: &common::Rig) -> SyncReport {
    r.scheduler
        .request_sync()
        .recv_timeout(WAIT)
        .expect("sync report")
}

#[test]
fn stale_remote_never_regresses_local() {
    let store = MemoryStore::new();
    store.save(&persisted(0, 120.0, 90.0)).unwrap();
    let remote = MemoryRemote::new();
    remote.set_remote(0, [("Steps", 100.0)]);
    let r = rig_with(tracker_cfg(), store, remote);

    r.scheduler.start().unwrap();
    let SyncReport::Completed(snap) = sync(&r) else {
        panic!("sync did not complete");
    };
    assert_eq!(snap.get("Steps"), 120.0);
    assert_eq!(r.remote.value("Steps"), Some(120.0));
    assert_eq!(r.remote.value("Distance"), Some(90.0));
    assert_eq!(r.scheduler.state(), SchedulerState::Tracking);
    assert!(r.scheduler.last_sync_ms().unwrap().is_some());
}

#[test]
fn larger_remote_value_is_adopted() {
    let remote = MemoryRemote::new();
    remote.set_remote(0, [("Steps", 900.0), ("Distance", 675.0)]);
    let r = rig_with(tracker_cfg(), MemoryStore::new(), remote);
    r.scheduler.start().unwrap();
    r.sensor.push_samples(walk(2));
    assert!(wait_until(WAIT, || steps(&r.scheduler) == 2.0));

    assert!(sync(&r).is_completed());
    assert_eq!(steps(&r.scheduler), 900.0);

    // Counting continues from the merged value.
    r.sensor.push_samples(walk(1));
    assert!(wait_until(WAIT, || steps(&r.scheduler) == 901.0));
}

#[test]
fn local_reset_beats_stale_remote() {
    let store = MemoryStore::new();
    store.save(&persisted(0, 4200.0, 3150.0)).unwrap();
    let remote = MemoryRemote::new();
    remote.set_remote(0, [("Steps", 4200.0), ("Distance", 3150.0)]);
    let r = rig_with(tracker_cfg(), store, remote);

    r.scheduler.start().unwrap();
    r.scheduler.reset().unwrap();
    r.sensor.push_samples(walk(1));
    assert!(wait_until(WAIT, || steps(&r.scheduler) == 1.0));

    assert!(sync(&r).is_completed());
    assert_eq!(steps(&r.scheduler), 1.0);
    assert_eq!(r.remote.epoch(), 1);
    assert_eq!(r.remote.value("Steps"), Some(1.0));
}

#[test]
fn remote_reset_elsewhere_wins() {
    let store = MemoryStore::new();
    store.save(&persisted(0, 500.0, 375.0)).unwrap();
    let remote = MemoryRemote::new();
    remote.set_remote(0, [("Steps", 500.0), ("Distance", 375.0)]);
    remote.external_reset();
    let r = rig_with(tracker_cfg(), store, remote);

    r.scheduler.start().unwrap();
    let SyncReport::Completed(snap) = sync(&r) else {
        panic!("sync did not complete");
    };
    assert_eq!(snap, MetricsSnapshot::from([("Distance", 0.0), ("Steps", 0.0)]));
    assert_eq!(r.remote.epoch(), 1);
}

#[test]
fn failed_sync_returns_to_tracking_without_retry() {
    let r = rig();
    r.scheduler.start().unwrap();
    r.remote.fail_next(1);

    assert!(matches!(sync(&r), SyncReport::Failed(TrackerError::SyncFailure(_))));
    assert_eq!(r.scheduler.state(), SchedulerState::Tracking);
    assert_eq!(r.scheduler.last_sync_ms().unwrap(), None);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(r.remote.pulls(), 0);

    assert!(sync(&r).is_completed());
    assert_eq!(r.remote.pulls(), 1);
}

#[test]
fn slow_remote_does_not_block_tracking() {
    let r = rig();
    r.scheduler.start().unwrap();
    r.remote.set_delay(Some(Duration::from_millis(400)));

    let report = r.scheduler.request_sync();
    assert!(wait_until(WAIT, || r.scheduler.state() == SchedulerState::Syncing));
    r.sensor.push_samples(walk(2));
    assert!(wait_until(WAIT, || steps(&r.scheduler) == 2.0));

    assert!(report.recv_timeout(WAIT).unwrap().is_completed());
    assert_eq!(r.scheduler.state(), SchedulerState::Tracking);
}

#[test]
fn sync_while_stopped_is_skipped() {
    let r = rig();
    assert!(matches!(sync(&r), SyncReport::Skipped(_)));
    assert_eq!(r.remote.pulls(), 0);
}

#[test]
fn stop_discards_in_flight_sync() {
    let remote = MemoryRemote::new();
    remote.set_remote(0, [("Steps", 777.0)]);
    let r = rig_with(tracker_cfg(), MemoryStore::new(), remote);
    r.scheduler.start().unwrap();
    r.remote.set_delay(Some(Duration::from_millis(200)));

    let report = r.scheduler.request_sync();
    assert!(wait_until(WAIT, || r.scheduler.state() == SchedulerState::Syncing));
    r.scheduler.stop().unwrap();
    assert!(matches!(report.recv_timeout(WAIT).unwrap(), SyncReport::Skipped(_)));

    // The late pull result must not reach the snapshot.
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(steps(&r.scheduler), 0.0);
    assert_eq!(r.scheduler.state(), SchedulerState::Stopped);
}

#[test]
fn periodic_tick_syncs_and_respects_spacing() {
    let mut cfg = tracker_cfg();
    cfg.sync = SyncCfg {
        interval: Duration::from_millis(100),
        persist_interval: Duration::from_secs(3600),
    };
    let r = rig_with(cfg, MemoryStore::new(), MemoryRemote::new());
    r.scheduler.start().unwrap();
    assert!(wait_until(WAIT, || r.scheduler.last_sync_ms().unwrap().is_some()));
    assert!(r.remote.pulls() >= 1);
}

#[test]
fn concurrent_requests_share_one_sync() {
    let r = rig();
    r.scheduler.start().unwrap();
    r.remote.set_delay(Some(Duration::from_millis(150)));
    let a = r.scheduler.request_sync();
    let b = r.scheduler.request_sync();
    assert!(a.recv_timeout(WAIT).unwrap().is_completed());
    assert!(b.recv_timeout(WAIT).unwrap().is_completed());
    assert_eq!(r.remote.pulls(), 1);
}
