#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Display binding: point-in-time metric reads and plain-text rendering.
//!
//! There is no subscription model. Callers poll `get_metrics_data` on their
//! own lifecycle events.

use std::fmt::Write as _;
use std::sync::Arc;

use stepsync_core::{
    BackgroundScheduler, LifecycleCoordinator, MetricDefinition, MetricsSnapshot, TrackerError,
    available_metrics, coming_soon_metrics,
};

/// Anything that can answer "what are the metrics right now".
pub trait MetricsSource {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError>;
}

impl MetricsSource for BackgroundScheduler {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError> {
        self.snapshot()
    }
}

impl MetricsSource for LifecycleCoordinator {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError> {
        self.scheduler().snapshot()
    }
}

/// A snapshot read offline, e.g. straight from the persisted file.
impl MetricsSource for MetricsSnapshot {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError> {
        Ok(self.clone())
    }
}

impl<T: MetricsSource + ?Sized> MetricsSource for &T {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError> {
        (**self).metrics()
    }
}

impl<T: MetricsSource + ?Sized> MetricsSource for Arc<T> {
    fn metrics(&self) -> Result<MetricsSnapshot, TrackerError> {
        (**self).metrics()
    }
}

pub struct DisplayBinding<S> {
    source: S,
    daily_step_goal: u64,
}

impl<S: MetricsSource> DisplayBinding<S> {
    pub fn new(source: S, daily_step_goal: u64) -> Self {
        Self {
            source,
            daily_step_goal: daily_step_goal.max(1),
        }
    }

    pub fn get_metrics_data(&self) -> Result<MetricsSnapshot, TrackerError> {
        self.source.metrics()
    }

    pub fn get_available_metrics(&self) -> Vec<MetricDefinition> {
        available_metrics()
    }

    pub fn get_coming_soon_metrics(&self) -> Vec<MetricDefinition> {
        coming_soon_metrics()
    }

    /// Metrics table followed by the step-goal bar.
    pub fn render(&self) -> Result<String, TrackerError> {
        let snap = self.get_metrics_data()?;
        let mut out = render_summary(&snap, &self.get_available_metrics());
        out.push_str(&render_progress_bar(
            snap.get("Steps"),
            self.daily_step_goal,
            30,
        ));
        out.push('\n');
        Ok(out)
    }
}

fn format_value(def: &MetricDefinition, value: f64) -> String {
    match def.unit {
        "count" => format!("{value:.0}"),
        "m" if value >= 1000.0 => format!("{:.2} km", value / 1000.0),
        unit => format!("{value:.1} {unit}"),
    }
}

/// One line per implemented metric, labels left-aligned.
pub fn render_summary(snapshot: &MetricsSnapshot, defs: &[MetricDefinition]) -> String {
    let width = defs.iter().map(|d| d.label.len()).max().unwrap_or(0);
    let mut out = String::new();
    for def in defs {
        let _ = writeln!(
            out,
            "{:<width$}  {}",
            def.label,
            format_value(def, snapshot.get(def.name))
        );
    }
    out
}

/// `[#####.....]  50% of 10000 steps`. Progress past the goal shows a full bar.
pub fn render_progress_bar(steps: f64, goal: u64, width: usize) -> String {
    let goal = goal.max(1) as f64;
    let ratio = if steps.is_finite() { (steps / goal).max(0.0) } else { 0.0 };
    let filled = ((ratio.min(1.0) * width as f64).round() as usize).min(width);
    format!(
        "[{}{}] {:>3.0}% of {goal:.0} steps",
        "#".repeat(filled),
        ".".repeat(width - filled),
        ratio * 100.0
    )
}

/// Names of the metrics announced but not measured yet, comma separated.
pub fn render_coming_soon(defs: &[MetricDefinition]) -> String {
    defs.iter()
        .map(|d| d.label)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "[..........]   0% of 100 steps")]
    #[case(50.0, "[#####.....]  50% of 100 steps")]
    #[case(100.0, "[##########] 100% of 100 steps")]
    #[case(250.0, "[##########] 250% of 100 steps")]
    #[case(f64::NAN, "[..........]   0% of 100 steps")]
    fn progress_bar(#[case] steps: f64, #[case] expected: &str) {
        assert_eq!(render_progress_bar(steps, 100, 10), expected);
    }

    #[test]
    fn summary_lists_implemented_metrics_only() {
        let snap = MetricsSnapshot::from([("Steps", 4200.0), ("Distance", 3150.0)]);
        let text = render_summary(&snap, &available_metrics());
        assert_eq!(text, "Steps     4200\nDistance  3.15 km\n");
        assert!(!text.contains("Calories"));
    }

    #[test]
    fn binding_reads_from_any_source() {
        let snap = MetricsSnapshot::from([("Steps", 12.0)]);
        let binding = DisplayBinding::new(snap.clone(), 10_000);
        assert_eq!(binding.get_metrics_data().unwrap(), snap);
        assert_eq!(binding.get_available_metrics().len(), 2);
        assert_eq!(binding.get_coming_soon_metrics().len(), 4);
        let rendered = binding.render().unwrap();
        assert!(rendered.starts_with("Steps"));
        assert!(rendered.contains("0% of 10000 steps"));
    }

    #[test]
    fn coming_soon_is_comma_separated() {
        let text = render_coming_soon(&coming_soon_metrics());
        assert_eq!(
            text,
            "Calories burned, Active minutes, Floors climbed, Heart rate"
        );
    }
}
