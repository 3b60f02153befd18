//! Operational metrics about the generator itself.
//!
//! Kept as plain cumulative values and exported once per tick through the
//! same reconcilers as user metrics, so they get the same prefixes and the
//! same pull/push translation.

use crate::domain::labels::LabelSet;
use crate::domain::types::{
    BucketLayout, MetricBatch, MetricDescriptor, MetricId, MetricKind, SeriesId, SeriesPoint,
};
use std::sync::Arc;
use std::time::Duration;

pub const POINTS_TOTAL: &str = "gen_points_total";
pub const EXPORT_ERRORS_TOTAL: &str = "gen_export_errors_total";
pub const TICK_DURATION_SECONDS: &str = "gen_tick_duration_seconds";
pub const ACTIVE_SERIES: &str = "gen_active_series";

/// Exporter label for failures raised while generating, before any export.
pub const GENERATOR_EXPORTER: &str = "generator";

pub const TICK_DURATION_BUCKETS: [f64; 9] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

pub struct SelfInstrumentation {
    descriptors: Vec<MetricDescriptor>,
    /// `{metric_name=...}` per configured metric.
    metric_labels: Vec<Arc<LabelSet>>,
    /// `{exporter=..., metric_name=...}`, exporter-major.
    error_labels: Vec<Arc<LabelSet>>,
    exporters: Vec<String>,
    points_total: Vec<f64>,
    errors_total: Vec<f64>,
    active_series: Vec<f64>,
    pending_durations: Vec<f64>,
}

impl SelfInstrumentation {
    /// `metrics` are `(name, series count)` in configuration order; self
    /// metric ids are allocated from `first_id` upward.
    pub fn new(first_id: MetricId, metrics: &[(&str, usize)], exporters: &[&str]) -> Self {
        let id = |offset: usize| MetricId(first_id.0 + offset);
        let buckets = BucketLayout::new(TICK_DURATION_BUCKETS.to_vec())
            .unwrap_or_else(BucketLayout::default_histogram);

        let descriptors = vec![
            MetricDescriptor::new(
                id(0),
                POINTS_TOTAL,
                MetricKind::Counter,
                vec!["metric_name".into()],
            )
            .with_help("Points generated per metric"),
            MetricDescriptor::new(
                id(1),
                EXPORT_ERRORS_TOTAL,
                MetricKind::Counter,
                vec!["exporter".into(), "metric_name".into()],
            )
            .with_help("Generation and export failures per exporter and metric"),
            MetricDescriptor::new(id(2), TICK_DURATION_SECONDS, MetricKind::Histogram, vec![])
                .with_help("Wall time of one tick iteration")
                .with_buckets(buckets),
            MetricDescriptor::new(
                id(3),
                ACTIVE_SERIES,
                MetricKind::Gauge,
                vec!["metric_name".into()],
            )
            .with_help("Series in each metric's label space"),
        ];

        let metric_labels: Vec<Arc<LabelSet>> = metrics
            .iter()
            .map(|(name, _)| {
                Arc::new(LabelSet::new(vec![(
                    "metric_name".into(),
                    name.to_string(),
                )]))
            })
            .collect();

        let mut all_exporters = vec![GENERATOR_EXPORTER.to_string()];
        all_exporters.extend(exporters.iter().map(|e| e.to_string()));

        let error_labels = all_exporters
            .iter()
            .flat_map(|exporter| {
                metrics.iter().map(move |(name, _)| {
                    Arc::new(LabelSet::new(vec![
                        ("exporter".into(), exporter.clone()),
                        ("metric_name".into(), name.to_string()),
                    ]))
                })
            })
            .collect::<Vec<_>>();

        Self {
            descriptors,
            points_total: vec![0.0; metrics.len()],
            errors_total: vec![0.0; error_labels.len()],
            active_series: metrics.iter().map(|(_, n)| *n as f64).collect(),
            metric_labels,
            error_labels,
            exporters: all_exporters,
            pending_durations: Vec::new(),
        }
    }

    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    pub fn record_points(&mut self, metric_idx: usize, count: usize) {
        if let Some(total) = self.points_total.get_mut(metric_idx) {
            *total += count as f64;
        }
    }

    pub fn record_generation_error(&mut self, metric_idx: usize) {
        self.bump_error(0, metric_idx);
    }

    /// `exporter_idx` is the reconciler's position in the orchestrator.
    pub fn record_export_error(&mut self, exporter_idx: usize, metric_idx: usize) {
        self.bump_error(exporter_idx + 1, metric_idx);
    }

    fn bump_error(&mut self, exporter_slot: usize, metric_idx: usize) {
        let per_exporter = self.metric_labels.len();
        if metric_idx >= per_exporter {
            return;
        }
        if let Some(total) = self.errors_total.get_mut(exporter_slot * per_exporter + metric_idx) {
            *total += 1.0;
        }
    }

    pub fn record_tick_duration(&mut self, elapsed: Duration) {
        self.pending_durations.push(elapsed.as_secs_f64());
    }

    pub fn points_total(&self, metric_idx: usize) -> f64 {
        self.points_total.get(metric_idx).copied().unwrap_or(0.0)
    }

    pub fn errors_total(&self, exporter: &str, metric_idx: usize) -> f64 {
        let per_exporter = self.metric_labels.len();
        self.exporters
            .iter()
            .position(|e| e == exporter)
            .and_then(|slot| self.errors_total.get(slot * per_exporter + metric_idx))
            .copied()
            .unwrap_or(0.0)
    }

    /// Current values as batches, draining pending tick durations.
    pub fn batches(&mut self) -> Vec<MetricBatch> {
        let durations = std::mem::take(&mut self.pending_durations);
        let [points, errors, duration, active] = [0, 1, 2, 3].map(|i| &self.descriptors[i]);

        vec![
            batch(points, &self.metric_labels, &self.points_total),
            batch(errors, &self.error_labels, &self.errors_total),
            MetricBatch {
                metric: duration.id,
                kind: duration.kind,
                points: durations
                    .into_iter()
                    .map(|v| {
                        SeriesPoint::new(
                            duration.id,
                            SeriesId(0),
                            Arc::clone(&duration.name),
                            Arc::new(LabelSet::empty()),
                            v,
                        )
                    })
                    .collect(),
            },
            batch(active, &self.metric_labels, &self.active_series),
        ]
    }
}

fn batch(descriptor: &MetricDescriptor, labels: &[Arc<LabelSet>], values: &[f64]) -> MetricBatch {
    MetricBatch {
        metric: descriptor.id,
        kind: descriptor.kind,
        points: labels
            .iter()
            .zip(values)
            .enumerate()
            .map(|(idx, (labels, value))| {
                SeriesPoint::new(
                    descriptor.id,
                    SeriesId(idx),
                    Arc::clone(&descriptor.name),
                    Arc::clone(labels),
                    *value,
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrumentation() -> SelfInstrumentation {
        SelfInstrumentation::new(
            MetricId(2),
            &[("requests", 4), ("latency", 2)],
            &["prometheus", "push"],
        )
    }

    #[test]
    fn test_ids_follow_user_metrics() {
        let inst = instrumentation();
        let ids: Vec<usize> = inst.descriptors().iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_error_counters_are_per_exporter() {
        let mut inst = instrumentation();
        inst.record_generation_error(1);
        inst.record_export_error(1, 0);
        inst.record_export_error(1, 0);

        assert_eq!(inst.errors_total(GENERATOR_EXPORTER, 1), 1.0);
        assert_eq!(inst.errors_total("push", 0), 2.0);
        assert_eq!(inst.errors_total("prometheus", 0), 0.0);
    }

    #[test]
    fn test_batches_drain_durations() {
        let mut inst = instrumentation();
        inst.record_points(0, 4);
        inst.record_points(0, 4);
        inst.record_tick_duration(Duration::from_millis(3));

        let batches = inst.batches();
        assert_eq!(batches[0].points[0].value, 8.0);
        assert_eq!(batches[1].points.len(), 6);
        assert_eq!(batches[2].points.len(), 1);
        assert_eq!(batches[3].points[1].value, 2.0);

        assert!(inst.batches()[2].points.is_empty());
    }

    #[test]
    fn test_tick_duration_buckets() {
        let inst = instrumentation();
        let layout = inst.descriptors()[2].buckets.clone().unwrap();
        assert_eq!(layout.bounds(), &TICK_DURATION_BUCKETS);
    }
}
