//! The tracking session and its handle.
//!
//! `BackgroundScheduler` is a cheap handle; the session itself runs on one
//! dedicated thread that exclusively owns the cache, the detector and the
//! sampler. Sampler readings, timer ticks, worker results and handle
//! commands are all serialized through a single `select!`, so the two
//! writers of the snapshot (step increments and the sync merge) can never
//! interleave.
//!
//! State machine:
//!
//! ```text
//! Stopped --start--> Starting --ok--> Tracking --tick--> Syncing --done--> Tracking
//!                        \--sensor error--> Stopped
//! Tracking/Syncing --stop--> Stopped
//! Tracking/Syncing --sampler lost--> Stopped
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{self as xch, select};

use crate::cache::{LocalMetricsCache, MergeOutcome};
use crate::config::TrackerCfg;
use crate::detector::StepDetector;
use crate::error::TrackerError;
use crate::metrics::{MetricsHistoryEntry, MetricsSnapshot, tracked_metric_names};
use crate::sampler::{MotionReading, SensorSampler};
use crate::status::{SchedulerState, SyncReport};
use crate::store::{PersistReport, PersistWorker};
use crate::sync::{BoxedGateway, SyncJob, SyncResult, SyncWorker};
use crate::util::unix_ms;

type Reply<T> = xch::Sender<T>;

enum Command {
    Initialize(Reply<Result<(), TrackerError>>),
    Start(Reply<Result<(), TrackerError>>),
    Stop(Reply<()>),
    Sync {
        forced: bool,
        waiter: Option<Reply<SyncReport>>,
    },
    Reset(Reply<Result<MetricsHistoryEntry, TrackerError>>),
    Snapshot(Reply<MetricsSnapshot>),
    History(Reply<Vec<MetricsHistoryEntry>>),
    LastSync(Reply<Option<u64>>),
    Shutdown(Reply<()>),
}

enum Event {
    Command(Command),
    HandlesGone,
    Reading(MotionReading),
    SamplerGone,
    SyncTick,
    PersistTick,
    Sync(SyncResult),
    SyncWorkerGone,
    Persist(PersistReport),
    PersistWorkerGone,
}

fn gone() -> TrackerError {
    TrackerError::State("scheduler thread is gone".into())
}

/// Handle to a tracking session. Dropping it shuts the session down.
pub struct BackgroundScheduler {
    commands: Option<xch::Sender<Command>>,
    state: Arc<AtomicU8>,
    join_handle: Option<JoinHandle<()>>,
}

impl BackgroundScheduler {
    pub(crate) fn spawn(
        cfg: TrackerCfg,
        sampler: SensorSampler,
        gateway: BoxedGateway,
        cache: LocalMetricsCache,
    ) -> Self {
        let (cmd_tx, cmd_rx) = xch::unbounded();
        let state = Arc::new(AtomicU8::new(SchedulerState::Stopped as u8));
        let (sync_tx, sync_rx) = xch::unbounded();
        let (persist_tx, persist_rx) = xch::unbounded();

        let session = Session {
            detector: StepDetector::new(cfg.detector.clone()),
            persist: PersistWorker::spawn(cache.store(), persist_tx),
            sync: SyncWorker::spawn(gateway, sync_tx),
            cfg,
            cache,
            sampler,
            state: state.clone(),
            initialized: false,
            commands: cmd_rx,
            sync_rx: Some(sync_rx),
            persist_rx: Some(persist_rx),
            sync_ticker: None,
            persist_ticker: None,
            in_flight: None,
            next_sync_id: 0,
        };
        let join_handle = std::thread::Builder::new()
            .name("stepsync-session".into())
            .spawn(move || session.run());

        let join_handle = match join_handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn session thread");
                None
            }
        };
        Self {
            commands: Some(cmd_tx),
            state,
            join_handle,
        }
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, TrackerError> {
        let (tx, rx) = xch::bounded(1);
        self.commands
            .as_ref()
            .ok_or_else(gone)?
            .send(make(tx))
            .map_err(|_| gone())?;
        rx.recv().map_err(|_| gone())
    }

    /// Restore the persisted snapshot. Idempotent.
    pub fn initialize(&self) -> Result<(), TrackerError> {
        self.call(Command::Initialize)?
    }

    /// Open the sensor and arm the timers. A no-op while tracking.
    pub fn start(&self) -> Result<(), TrackerError> {
        self.call(Command::Start)?
    }

    /// `start` (which initializes first) unless sampling is already live.
    pub fn ensure_tracking(&self) -> Result<(), TrackerError> {
        if self.state().is_tracking() {
            return Ok(());
        }
        self.start()
    }

    /// Unsubscribe the sampler, cancel the timers and flush the snapshot.
    /// No reading or tick can touch the snapshot once this returns.
    pub fn stop(&self) -> Result<(), TrackerError> {
        self.call(Command::Stop)
    }

    /// Out-of-band sync, bypassing the periodic wait. Fire and forget.
    pub fn sync_now(&self) {
        if let Some(tx) = &self.commands {
            let _ = tx.send(Command::Sync {
                forced: true,
                waiter: None,
            });
        }
    }

    /// Out-of-band sync whose outcome arrives on the returned channel.
    pub fn request_sync(&self) -> xch::Receiver<SyncReport> {
        let (tx, rx) = xch::bounded(1);
        let sent = self.commands.as_ref().is_some_and(|c| {
            c.send(Command::Sync {
                forced: true,
                waiter: Some(tx.clone()),
            })
            .is_ok()
        });
        if !sent {
            let _ = tx.try_send(SyncReport::Failed(gone()));
        }
        rx
    }

    /// Archive the live snapshot, zero it and open a new epoch.
    pub fn reset(&self) -> Result<MetricsHistoryEntry, TrackerError> {
        self.call(Command::Reset)?
    }

    pub fn snapshot(&self) -> Result<MetricsSnapshot, TrackerError> {
        self.call(Command::Snapshot)
    }

    pub fn history(&self) -> Result<Vec<MetricsHistoryEntry>, TrackerError> {
        self.call(Command::History)
    }

    pub fn last_sync_ms(&self) -> Result<Option<u64>, TrackerError> {
        self.call(Command::LastSync)
    }

    /// Lock-free read of the current state.
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stop, flush and join the session thread.
    pub fn shutdown(&mut self) {
        if let Some(commands) = self.commands.take() {
            let (tx, rx) = xch::bounded(1);
            if commands.send(Command::Shutdown(tx)).is_ok() {
                let _ = rx.recv();
            }
        }
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("session thread panicked during shutdown");
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("state", &self.state())
            .finish()
    }
}

struct InFlight {
    id: u64,
    waiters: Vec<Reply<SyncReport>>,
}

struct Session {
    cfg: TrackerCfg,
    cache: LocalMetricsCache,
    detector: StepDetector,
    sampler: SensorSampler,
    state: Arc<AtomicU8>,
    initialized: bool,
    commands: xch::Receiver<Command>,
    sync: SyncWorker,
    sync_rx: Option<xch::Receiver<SyncResult>>,
    persist: PersistWorker,
    persist_rx: Option<xch::Receiver<PersistReport>>,
    sync_ticker: Option<xch::Receiver<Instant>>,
    persist_ticker: Option<xch::Receiver<Instant>>,
    in_flight: Option<InFlight>,
    next_sync_id: u64,
}

fn or_never<T>(rx: Option<&xch::Receiver<T>>) -> xch::Receiver<T> {
    rx.cloned().unwrap_or_else(xch::never)
}

impl Session {
    fn run(mut self) {
        tracing::debug!("session thread started");
        loop {
            match self.next_event() {
                Event::Command(Command::Shutdown(reply)) => {
                    self.stop();
                    let _ = reply.send(());
                    break;
                }
                Event::HandlesGone => {
                    self.stop();
                    break;
                }
                Event::Command(cmd) => self.on_command(cmd),
                Event::Reading(r) => self.on_reading(r),
                Event::SamplerGone => {
                    tracing::warn!(
                        error = %TrackerError::SensorUnavailable("sampling thread exited".into()),
                        "sampling lost; stopped until the next start"
                    );
                    // Stopped lets the next foreground or headless wake
                    // restart sampling.
                    self.stop();
                }
                Event::SyncTick => self.on_sync_tick(),
                Event::PersistTick => self.on_persist_tick(),
                Event::Sync(res) => self.on_sync_result(res),
                Event::SyncWorkerGone => {
                    tracing::error!("sync worker exited; remote sync disabled");
                    self.sync_rx = None;
                    self.fail_in_flight(TrackerError::SyncFailure("sync worker gone".into()));
                }
                Event::Persist(Ok(epoch)) => tracing::trace!(epoch, "snapshot written"),
                Event::Persist(Err(e)) => {
                    tracing::warn!(error = %e, "snapshot write failed; tracking continues in memory");
                    self.cache.mark_dirty();
                }
                Event::PersistWorkerGone => {
                    tracing::error!("persist worker exited");
                    self.persist_rx = None;
                }
            }
        }
        tracing::debug!("session thread exiting");
    }

    /// Wait for the next thing to happen. Receivers are cloned for the
    /// duration of the wait only, so handlers are free to replace them.
    fn next_event(&self) -> Event {
        let readings = or_never(self.sampler.receiver());
        let sync_tick = or_never(self.sync_ticker.as_ref());
        let persist_tick = or_never(self.persist_ticker.as_ref());
        let sync_rx = or_never(self.sync_rx.as_ref());
        let persist_rx = or_never(self.persist_rx.as_ref());

        select! {
            recv(self.commands) -> msg => msg.map_or(Event::HandlesGone, Event::Command),
            recv(readings) -> msg => msg.map_or(Event::SamplerGone, Event::Reading),
            recv(sync_tick) -> _ => Event::SyncTick,
            recv(persist_tick) -> _ => Event::PersistTick,
            recv(sync_rx) -> msg => msg.map_or(Event::SyncWorkerGone, Event::Sync),
            recv(persist_rx) -> msg => msg.map_or(Event::PersistWorkerGone, Event::Persist),
        }
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: SchedulerState) {
        let prev = SchedulerState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            tracing::info!(from = %prev, to = %next, "scheduler state");
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Initialize(reply) => {
                let _ = reply.send(self.initialize());
            }
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Sync { forced, waiter } => self.begin_sync(forced, waiter),
            Command::Reset(reply) => {
                let _ = reply.send(self.reset());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.cache.get_all());
            }
            Command::History(reply) => {
                let _ = reply.send(self.cache.history().to_vec());
            }
            Command::LastSync(reply) => {
                let _ = reply.send(self.cache.last_sync_ms());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn initialize(&mut self) -> Result<(), TrackerError> {
        if self.initialized {
            tracing::debug!("already initialized");
            return Ok(());
        }
        self.cache.load()?;
        self.initialized = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), TrackerError> {
        if self.state().is_tracking() {
            tracing::debug!("start ignored; already tracking");
            return Ok(());
        }
        self.set_state(SchedulerState::Starting);
        let started = self
            .initialize()
            .map_err(|e| TrackerError::InitializationFailure(format!("restore snapshot: {e}")))
            .and_then(|()| {
                self.sampler
                    .start()
                    .map_err(|e| TrackerError::InitializationFailure(e.to_string()))
            });
        if let Err(e) = started {
            tracing::error!(error = %e, "tracking session failed to start");
            self.set_state(SchedulerState::Stopped);
            return Err(e);
        }
        self.sync_ticker = Some(xch::tick(self.cfg.sync.interval));
        self.persist_ticker = Some(xch::tick(self.cfg.sync.persist_interval));
        self.set_state(SchedulerState::Tracking);
        Ok(())
    }

    fn stop(&mut self) {
        if self.state() == SchedulerState::Stopped && !self.sampler.is_running() {
            tracing::debug!("stop ignored; already stopped");
            return;
        }
        self.sampler.stop();
        self.sync_ticker = None;
        self.persist_ticker = None;
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(id = in_flight.id, "discarding in-flight sync");
            notify(
                in_flight.waiters,
                &SyncReport::Skipped("session stopped".into()),
            );
        }
        if self.initialized {
            match self.persist.flush(self.cache.to_persisted()) {
                Ok(()) => self.cache.mark_clean(),
                Err(e) => tracing::warn!(error = %e, "final snapshot flush failed"),
            }
        }
        self.set_state(SchedulerState::Stopped);
    }

    fn on_reading(&mut self, r: MotionReading) {
        let Some(increments) = self.detector.observe(r.vector, r.at_ms) else {
            return;
        };
        for sample in &increments {
            if let Err(e) = self.cache.record(sample) {
                tracing::warn!(error = %e, "increment rejected");
            }
        }
        tracing::debug!(
            at_ms = r.at_ms,
            steps = self.cache.get("Steps"),
            "step"
        );
    }

    fn on_persist_tick(&mut self) {
        if self.cache.is_dirty() {
            self.persist.write(self.cache.to_persisted());
            self.cache.mark_clean();
        }
    }

    fn on_sync_tick(&mut self) {
        if self.state() == SchedulerState::Syncing {
            tracing::debug!("tick ignored; sync in flight");
            return;
        }
        self.begin_sync(false, None);
    }

    fn begin_sync(&mut self, forced: bool, waiter: Option<Reply<SyncReport>>) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            tracing::debug!(id = in_flight.id, "joining in-flight sync");
            in_flight.waiters.extend(waiter);
            return;
        }
        if self.state() != SchedulerState::Tracking {
            notify(waiter, &SyncReport::Skipped("not tracking".into()));
            return;
        }
        if !forced
            && let Some(last) = self.cache.last_sync_ms()
        {
            let spacing = u64::try_from(self.cfg.sync.min_spacing().as_millis()).unwrap_or(u64::MAX);
            let age = unix_ms().saturating_sub(last);
            if age < spacing {
                tracing::debug!(age_ms = age, "tick skipped; synced recently");
                notify(waiter, &SyncReport::Skipped("synced recently".into()));
                return;
            }
        }
        if self.sync_rx.is_none() {
            notify(
                waiter,
                &SyncReport::Failed(TrackerError::SyncFailure("sync worker gone".into())),
            );
            return;
        }

        self.next_sync_id += 1;
        let id = self.next_sync_id;
        let job = SyncJob::Pull {
            id,
            names: tracked_metric_names(),
        };
        if let Err(e) = self.sync.submit(job) {
            tracing::warn!(error = %e, "sync not started");
            notify(waiter, &SyncReport::Failed(e));
            return;
        }
        self.in_flight = Some(InFlight {
            id,
            waiters: waiter.into_iter().collect(),
        });
        self.set_state(SchedulerState::Syncing);
    }

    fn on_sync_result(&mut self, res: SyncResult) {
        if self.in_flight.as_ref().is_none_or(|f| f.id != res.id()) {
            tracing::debug!(id = res.id(), "stale sync result discarded");
            return;
        }
        match res {
            SyncResult::Pulled { id, result: Ok(remote) } => {
                let outcome = self.cache.merge_remote(&remote);
                tracing::debug!(?outcome, "merged remote snapshot");
                if let MergeOutcome::AdoptedRemote { .. } = outcome {
                    self.persist.write(self.cache.to_persisted());
                    self.cache.mark_clean();
                }
                let values = tracked_metric_names()
                    .into_iter()
                    .map(|n| {
                        let v = self.cache.get(&n);
                        (n, v)
                    })
                    .collect();
                let job = SyncJob::Push {
                    id,
                    epoch: self.cache.epoch(),
                    values,
                };
                if let Err(e) = self.sync.submit(job) {
                    self.fail_in_flight(e);
                }
            }
            SyncResult::Pushed { result: Ok(()), .. } => {
                self.cache.mark_synced(unix_ms());
                self.persist.write(self.cache.to_persisted());
                self.cache.mark_clean();
                let snapshot = self.cache.get_all();
                tracing::info!(
                    steps = snapshot.get("Steps"),
                    epoch = self.cache.epoch(),
                    "sync completed"
                );
                self.finish_in_flight(&SyncReport::Completed(snapshot));
            }
            SyncResult::Pulled { result: Err(e), .. } | SyncResult::Pushed { result: Err(e), .. } => {
                self.fail_in_flight(e);
            }
        }
    }

    fn fail_in_flight(&mut self, e: TrackerError) {
        if self.in_flight.is_none() {
            return;
        }
        tracing::warn!(error = %e, "sync failed; retrying on next tick");
        self.finish_in_flight(&SyncReport::Failed(e));
    }

    fn finish_in_flight(&mut self, report: &SyncReport) {
        let in_flight = self.in_flight.take();
        if self.state() == SchedulerState::Syncing {
            self.set_state(SchedulerState::Tracking);
        }
        if let Some(in_flight) = in_flight {
            notify(in_flight.waiters, report);
        }
    }

    /// A reset is durable or it did not happen: the new epoch is flushed
    /// before returning, and a failed write puts the old epoch back.
    fn reset(&mut self) -> Result<MetricsHistoryEntry, TrackerError> {
        self.initialize()?;
        let before = self.cache.to_persisted();
        let entry = self.cache.reset(unix_ms());
        match self.persist.flush(self.cache.to_persisted()) {
            Ok(()) => {
                self.cache.mark_clean();
                Ok(entry)
            }
            Err(e) => {
                tracing::error!(error = %e, epoch = entry.epoch, "reset not persisted; keeping epoch");
                self.cache.restore(before);
                self.cache.mark_dirty();
                Err(e)
            }
        }
    }
}

fn notify(waiters: impl IntoIterator<Item = Reply<SyncReport>>, report: &SyncReport) {
    for w in waiters {
        let _ = w.try_send(report.clone());
    }
}
