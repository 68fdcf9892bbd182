//! File-backed remote metric store.
//!
//! Stands in for the network service: one JSON document holding the current
//! epoch and the value of every metric. Several processes can point at the
//! same file to play the part of several devices sharing one account.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stepsync_traits::{BoxError, RemoteSnapshot, RemoteSyncGateway};

use crate::error::{HwError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub epoch: u64,
    pub values: BTreeMap<String, f64>,
}

pub struct FileRemoteStore {
    path: PathBuf,
}

impl FileRemoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document; an absent file is an empty store at epoch 0.
    pub fn document(&self) -> Result<RemoteDocument> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoteDocument::default()),
            Err(e) => Err(HwError::Io(e)),
        }
    }

    /// Reset the store from outside any device: bump the epoch, zero values.
    pub fn external_reset(&self) -> Result<RemoteDocument> {
        let mut doc = self.document()?;
        doc.epoch = doc.epoch.saturating_add(1);
        doc.values.values_mut().for_each(|v| *v = 0.0);
        self.write(&doc)?;
        Ok(doc)
    }

    fn write(&self, doc: &RemoteDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("new");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(tmp, &self.path)?;
        Ok(())
    }

    fn apply_push(&self, metric_name: &str, value: f64, epoch: u64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(HwError::RemoteRejected {
                metric: metric_name.to_string(),
                reason: format!("invalid value {value}"),
            });
        }
        let mut doc = self.document()?;
        if epoch < doc.epoch {
            return Err(HwError::RemoteRejected {
                metric: metric_name.to_string(),
                reason: format!("stale epoch {epoch} < {}", doc.epoch),
            });
        }
        if epoch > doc.epoch {
            doc.epoch = epoch;
            doc.values.clear();
        }
        doc.values.insert(metric_name.to_string(), value);
        self.write(&doc)
    }
}

impl RemoteSyncGateway for FileRemoteStore {
    fn pull(&mut self, metric_names: &[String]) -> std::result::Result<RemoteSnapshot, BoxError> {
        let doc = self.document()?;
        let values = metric_names
            .iter()
            .filter_map(|name| doc.values.get(name).map(|v| (name.clone(), *v)))
            .collect();
        tracing::debug!(path = ?self.path, epoch = doc.epoch, "remote pull");
        Ok(RemoteSnapshot {
            epoch: doc.epoch,
            values,
        })
    }

    fn push(
        &mut self,
        metric_name: &str,
        value: f64,
        epoch: u64,
    ) -> std::result::Result<(), BoxError> {
        self.apply_push(metric_name, value, epoch)?;
        tracing::debug!(metric = metric_name, value, epoch, "remote push");
        Ok(())
    }
}
