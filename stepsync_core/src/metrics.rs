//! Metric vocabulary: definitions, samples, snapshots and archive entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Every metric the product knows about, implemented or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    Steps,
    Distance,
    Calories,
    ActiveMinutes,
    Floors,
    HeartRate,
}

impl MetricKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Steps => "Steps",
            Self::Distance => "Distance",
            Self::Calories => "Calories",
            Self::ActiveMinutes => "ActiveMinutes",
            Self::Floors => "Floors",
            Self::HeartRate => "HeartRate",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of a metric as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    pub kind: MetricKind,
    pub name: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub implemented: bool,
}

const CATALOG: [MetricDefinition; 6] = [
    MetricDefinition {
        kind: MetricKind::Steps,
        name: "Steps",
        label: "Steps",
        unit: "count",
        implemented: true,
    },
    MetricDefinition {
        kind: MetricKind::Distance,
        name: "Distance",
        label: "Distance",
        unit: "m",
        implemented: true,
    },
    MetricDefinition {
        kind: MetricKind::Calories,
        name: "Calories",
        label: "Calories burned",
        unit: "kcal",
        implemented: false,
    },
    MetricDefinition {
        kind: MetricKind::ActiveMinutes,
        name: "ActiveMinutes",
        label: "Active minutes",
        unit: "min",
        implemented: false,
    },
    MetricDefinition {
        kind: MetricKind::Floors,
        name: "Floors",
        label: "Floors climbed",
        unit: "count",
        implemented: false,
    },
    MetricDefinition {
        kind: MetricKind::HeartRate,
        name: "HeartRate",
        label: "Heart rate",
        unit: "bpm",
        implemented: false,
    },
];

/// Metrics the tracker actually measures.
pub fn available_metrics() -> Vec<MetricDefinition> {
    CATALOG.iter().copied().filter(|d| d.implemented).collect()
}

/// Metrics announced but not measured yet.
pub fn coming_soon_metrics() -> Vec<MetricDefinition> {
    CATALOG.iter().copied().filter(|d| !d.implemented).collect()
}

/// Names of the implemented metrics, in catalog order.
pub fn tracked_metric_names() -> Vec<String> {
    CATALOG
        .iter()
        .filter(|d| d.implemented)
        .map(|d| d.name.to_string())
        .collect()
}

/// One increment emitted by the step detector.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric_name: &'static str,
    pub value: f64,
    pub timestamp_ms: u64,
}

/// Point-in-time metric values. Absent names read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot {
    values: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot with every implemented metric present at zero.
    pub fn zeroed() -> Self {
        let values = tracked_metric_names()
            .into_iter()
            .map(|n| (n, 0.0))
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub(crate) fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

impl<const N: usize> From<[(&str, f64); N]> for MetricsSnapshot {
    fn from(pairs: [(&str, f64); N]) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

/// Archived snapshot, written once when an epoch is closed by a reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistoryEntry {
    pub timestamp_ms: u64,
    pub epoch: u64,
    pub snapshot: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_partitions_into_available_and_coming_soon() {
        let available: Vec<_> = available_metrics().iter().map(|d| d.kind).collect();
        let soon: Vec<_> = coming_soon_metrics().iter().map(|d| d.kind).collect();
        assert_eq!(available, vec![MetricKind::Steps, MetricKind::Distance]);
        assert_eq!(soon.len(), 4);
        assert!(soon.iter().all(|k| !available.contains(k)));
    }

    #[test]
    fn catalog_names_match_kind_names() {
        for d in available_metrics().into_iter().chain(coming_soon_metrics()) {
            assert_eq!(d.name, d.kind.name());
        }
    }

    #[test]
    fn snapshot_reads_absent_as_zero() {
        let snap = MetricsSnapshot::from([("Steps", 12.0)]);
        assert_eq!(snap.get("Steps"), 12.0);
        assert_eq!(snap.get("Distance"), 0.0);
    }

    #[test]
    fn snapshot_serializes_as_plain_map() {
        let snap = MetricsSnapshot::from([("Distance", 3150.0), ("Steps", 4200.0)]);
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(json, r#"{"Distance":3150.0,"Steps":4200.0}"#);
    }
}
