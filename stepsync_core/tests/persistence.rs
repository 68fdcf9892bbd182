mod common;

use std::collections::BTreeMap;

use common::{WAIT, rig_with, steps, tracker_cfg, wait_until, walk};
use rstest::rstest;
use stepsync_core::mocks::MemoryRemote;
use stepsync_core::store::FORMAT_VERSION;
use stepsync_core::{
    BackgroundScheduler, JsonFileStore, MemoryStore, MetricsSnapshot, PersistedMetrics,
    SnapshotStore, TrackerError,
};

#[test]
fn snapshot_survives_restart() {
    let store = MemoryStore::new();
    let before = {
        let r = rig_with(tracker_cfg(), store.clone(), MemoryRemote::new());
        r.scheduler.start().unwrap();
        r.sensor.push_samples(walk(7));
        assert!(wait_until(WAIT, || steps(&r.scheduler) == 7.0));
        r.scheduler.snapshot().unwrap()
        // drop: stop + flush + join
    };

    let r = rig_with(tracker_cfg(), store, MemoryRemote::new());
    r.scheduler.initialize().unwrap();
    assert_eq!(r.scheduler.snapshot().unwrap(), before);
}

#[test]
fn json_store_round_trip_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/stepsync.json");

    let scheduler = BackgroundScheduler::builder()
        .with_sensor(stepsync_core::mocks::ScriptedSensor::new())
        .with_gateway(MemoryRemote::new())
        .with_store(JsonFileStore::new(&path))
        .with_config(tracker_cfg())
        .build()
        .unwrap();
    scheduler.initialize().unwrap();
    let entry = scheduler.reset().unwrap();
    assert_eq!(entry.epoch, 0);
    drop(scheduler);

    let on_disk = JsonFileStore::new(&path).load().unwrap().unwrap();
    assert_eq!(on_disk.epoch, 1);
    assert_eq!(on_disk.history.len(), 1);
}

#[test]
fn reset_archives_exactly_once() {
    let store = MemoryStore::new();
    store
        .save(&PersistedMetrics {
            version: FORMAT_VERSION,
            epoch: 0,
            values: BTreeMap::from([
                ("Steps".to_string(), 4200.0),
                ("Distance".to_string(), 3150.0),
            ]),
            history: Vec::new(),
            last_sync_ms: None,
        })
        .unwrap();
    let r = rig_with(tracker_cfg(), store.clone(), MemoryRemote::new());

    let entry = r.scheduler.reset().unwrap();
    let expected = MetricsSnapshot::from([("Distance", 3150.0), ("Steps", 4200.0)]);
    assert_eq!(entry.snapshot, expected);
    assert_eq!(
        r.scheduler.snapshot().unwrap(),
        MetricsSnapshot::from([("Distance", 0.0), ("Steps", 0.0)])
    );
    let history = r.scheduler.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot, expected);

    r.scheduler.stop().unwrap();
    drop(r);
    let saved = store.contents().unwrap();
    assert_eq!(saved.history.len(), 1);
    assert_eq!(saved.values["Steps"], 0.0);
}

#[test]
fn write_failures_do_not_stop_tracking() {
    let store = MemoryStore::new();
    store.fail_writes(true);
    let r = rig_with(tracker_cfg(), store.clone(), MemoryRemote::new());
    r.scheduler.start().unwrap();
    r.sensor.push_samples(walk(3));
    assert!(wait_until(WAIT, || steps(&r.scheduler) == 3.0));
    r.scheduler.stop().unwrap();
    assert_eq!(store.saves(), 0);
    assert_eq!(steps(&r.scheduler), 3.0);
}

#[rstest]
#[case::corrupt(b"{not json".as_slice())]
#[case::wrong_version(br#"{"version":9,"epoch":0,"values":{}}"#.as_slice())]
fn unreadable_snapshot_fails_start(#[case] contents: &[u8]) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, contents).unwrap();

    let scheduler = BackgroundScheduler::builder()
        .with_sensor(stepsync_core::mocks::ScriptedSensor::new())
        .with_gateway(MemoryRemote::new())
        .with_store(JsonFileStore::new(&path))
        .build()
        .unwrap();
    assert!(matches!(
        scheduler.initialize(),
        Err(TrackerError::PersistenceFailure(_))
    ));
    assert!(matches!(
        scheduler.start(),
        Err(TrackerError::InitializationFailure(_))
    ));
    drop(scheduler);
    // The unreadable file is left for inspection, not overwritten.
    assert_eq!(std::fs::read(&path).unwrap(), contents);
}

#[test]
fn reset_that_cannot_be_written_is_undone() {
    let store = MemoryStore::new();
    store
        .save(&PersistedMetrics {
            version: FORMAT_VERSION,
            epoch: 2,
            values: BTreeMap::from([("Steps".to_string(), 900.0)]),
            history: Vec::new(),
            last_sync_ms: None,
        })
        .unwrap();
    store.fail_writes(true);
    let r = rig_with(tracker_cfg(), store.clone(), MemoryRemote::new());
    r.scheduler.initialize().unwrap();

    assert!(matches!(
        r.scheduler.reset(),
        Err(TrackerError::PersistenceFailure(_))
    ));
    assert_eq!(steps(&r.scheduler), 900.0);
    assert!(r.scheduler.history().unwrap().is_empty());

    store.fail_writes(false);
    let entry = r.scheduler.reset().unwrap();
    assert_eq!(entry.epoch, 2);
    assert_eq!(store.contents().unwrap().epoch, 3);
}
