use crate::domain::labels::{LabelSet, SeriesKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Closed set of metric kinds. Resolved once at registration; the tick path
/// dispatches on this enum, never on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }

    /// Histogram and Summary emit raw observations rather than a running value.
    pub fn is_observation(&self) -> bool {
        matches!(self, MetricKind::Histogram | MetricKind::Summary)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dense index of a registered metric, assigned at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub usize);

/// Dense index of a series within its metric's label space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(pub usize);

/// Default histogram boundaries when a metric configures none.
pub const DEFAULT_HISTOGRAM_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Explicit upper-inclusive bucket boundaries. The `+Inf` bucket is implicit
/// and has index `bounds().len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketLayout {
    bounds: Arc<[f64]>,
}

impl BucketLayout {
    /// Returns `None` unless every boundary is finite and strictly increasing.
    pub fn new(bounds: Vec<f64>) -> Option<Self> {
        if bounds.iter().any(|b| !b.is_finite()) {
            return None;
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return None;
        }
        Some(Self {
            bounds: bounds.into(),
        })
    }

    /// Layout with only the implicit `+Inf` bucket (count and sum only).
    pub fn inf_only() -> Self {
        Self {
            bounds: Arc::from(Vec::new()),
        }
    }

    pub fn default_histogram() -> Self {
        Self {
            bounds: Arc::from(DEFAULT_HISTOGRAM_BUCKETS.to_vec()),
        }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Index of the first bucket whose upper bound is `>= value`.
    pub fn index_of(&self, value: f64) -> usize {
        self.bounds.partition_point(|b| *b < value)
    }
}

impl fmt::Display for BucketLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.bounds())
    }
}

/// Static description of a metric handed to every exporter at registration.
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    pub id: MetricId,
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub help: String,
    pub label_names: Vec<String>,
    /// Present for Histogram and Summary; shared by every reconciler.
    pub buckets: Option<BucketLayout>,
}

impl MetricDescriptor {
    pub fn new(id: MetricId, name: &str, kind: MetricKind, label_names: Vec<String>) -> Self {
        let buckets = match kind {
            MetricKind::Histogram => Some(BucketLayout::default_histogram()),
            MetricKind::Summary => Some(BucketLayout::inf_only()),
            _ => None,
        };
        Self {
            id,
            name: Arc::from(name),
            kind,
            help: format!("Generated {} metric: {}", kind, name),
            label_names,
            buckets,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_buckets(mut self, buckets: BucketLayout) -> Self {
        if self.kind.is_observation() {
            self.buckets = Some(buckets);
        }
        self
    }
}

/// Immutable per-series, per-tick value. Never mutated after the spike
/// multiplier has been applied.
#[derive(Debug, Clone)]
pub struct SeriesPoint {
    pub metric: MetricId,
    pub series: SeriesId,
    pub name: Arc<str>,
    pub labels: Arc<LabelSet>,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(
        metric: MetricId,
        series: SeriesId,
        name: Arc<str>,
        labels: Arc<LabelSet>,
        value: f64,
    ) -> Self {
        Self {
            metric,
            series,
            name,
            labels,
            value,
        }
    }

    pub fn scaled(self, multiplier: f64) -> Self {
        Self {
            value: self.value * multiplier,
            ..self
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.name, &self.labels)
    }
}

/// All points one metric produced in one tick, annotated with its kind.
#[derive(Debug, Clone)]
pub struct MetricBatch {
    pub metric: MetricId,
    pub kind: MetricKind,
    pub points: Vec<SeriesPoint>,
}
