//! Remote reconciliation worker.
//!
//! The gateway lives on its own thread so a slow or hung remote delays only
//! the next sync, never sampling. The worker does I/O only: merging happens
//! on the session thread, which sends the push job once the merge is done.

use std::thread::JoinHandle;

use crossbeam_channel as xch;
use stepsync_traits::{RemoteSnapshot, RemoteSyncGateway};

use crate::error::TrackerError;
use crate::hw_error::map_sync_error;

pub type BoxedGateway = Box<dyn RemoteSyncGateway + Send>;

pub(crate) enum SyncJob {
    Pull {
        id: u64,
        names: Vec<String>,
    },
    Push {
        id: u64,
        epoch: u64,
        values: Vec<(String, f64)>,
    },
}

#[derive(Debug)]
pub(crate) enum SyncResult {
    Pulled {
        id: u64,
        result: Result<RemoteSnapshot, TrackerError>,
    },
    Pushed {
        id: u64,
        result: Result<(), TrackerError>,
    },
}

impl SyncResult {
    pub(crate) fn id(&self) -> u64 {
        match self {
            Self::Pulled { id, .. } | Self::Pushed { id, .. } => *id,
        }
    }
}

fn push_all(
    gateway: &mut BoxedGateway,
    epoch: u64,
    values: &[(String, f64)],
) -> Result<(), TrackerError> {
    for (name, value) in values {
        gateway
            .push(name, *value, epoch)
            .map_err(|e| map_sync_error(e.as_ref()))?;
    }
    Ok(())
}

pub(crate) struct SyncWorker {
    jobs: Option<xch::Sender<SyncJob>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub(crate) fn spawn(mut gateway: BoxedGateway, results: xch::Sender<SyncResult>) -> Self {
        let (tx, rx) = xch::unbounded::<SyncJob>();
        let join_handle = std::thread::spawn(move || {
            for job in rx {
                let result = match job {
                    SyncJob::Pull { id, names } => SyncResult::Pulled {
                        id,
                        result: gateway
                            .pull(&names)
                            .map_err(|e| map_sync_error(e.as_ref())),
                    },
                    SyncJob::Push { id, epoch, values } => SyncResult::Pushed {
                        id,
                        result: push_all(&mut gateway, epoch, &values),
                    },
                };
                if results.send(result).is_err() {
                    break;
                }
            }
            tracing::trace!("sync worker exiting");
        });
        Self {
            jobs: Some(tx),
            join_handle: Some(join_handle),
        }
    }

    pub(crate) fn submit(&self, job: SyncJob) -> Result<(), TrackerError> {
        self.jobs
            .as_ref()
            .ok_or_else(|| TrackerError::SyncFailure("sync worker stopped".into()))?
            .send(job)
            .map_err(|_| TrackerError::SyncFailure("sync worker gone".into()))
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.jobs.take();
        // A gateway call in flight is not waited for; the thread exits as
        // soon as it returns and finds the queue closed.
        if let Some(handle) = self.join_handle.take()
            && handle.is_finished()
            && handle.join().is_err()
        {
            tracing::warn!("sync worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryRemote;

    #[test]
    fn pull_then_push_round_trip() {
        let remote = MemoryRemote::new();
        remote.set_remote(0, [("Steps", 40.0)]);
        let (tx, rx) = xch::unbounded();
        let worker = SyncWorker::spawn(Box::new(remote.clone()), tx);

        worker
            .submit(SyncJob::Pull {
                id: 7,
                names: vec!["Steps".into()],
            })
            .unwrap();
        match rx.recv().unwrap() {
            SyncResult::Pulled { id, result } => {
                assert_eq!(id, 7);
                assert_eq!(result.unwrap().values["Steps"], 40.0);
            }
            other => panic!("unexpected {other:?}"),
        }

        worker
            .submit(SyncJob::Push {
                id: 7,
                epoch: 0,
                values: vec![("Steps".into(), 55.0)],
            })
            .unwrap();
        let pushed = rx.recv().unwrap();
        assert_eq!(pushed.id(), 7);
        assert!(matches!(pushed, SyncResult::Pushed { result: Ok(()), .. }));
        assert_eq!(remote.value("Steps"), Some(55.0));
    }

    #[test]
    fn gateway_errors_become_sync_failures() {
        let remote = MemoryRemote::new();
        remote.fail_next(1);
        let (tx, rx) = xch::unbounded();
        let worker = SyncWorker::spawn(Box::new(remote), tx);
        worker
            .submit(SyncJob::Pull {
                id: 1,
                names: vec!["Steps".into()],
            })
            .unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            SyncResult::Pulled {
                result: Err(TrackerError::SyncFailure(_)),
                ..
            }
        ));
    }
}
