//! Pull-model sink over a `prometheus` registry.
//!
//! Counters and gauges hold absolute values, histograms and summaries raw
//! observations. The registry handle is shared with the scrape server.

use crate::domain::errors::ExportError;
use crate::domain::ports::{PullSink, PullWrite};
use crate::domain::types::{MetricDescriptor, MetricKind, SeriesPoint};
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::debug;

/// Cloneable read side: renders the text exposition format.
#[derive(Clone, Default)]
pub struct PrometheusRegistry {
    registry: Arc<Registry>,
}

impl PrometheusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> Result<String, ExportError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        Ok(encoder.encode_to_string(&metric_families)?)
    }

    /// Write side registering into this registry.
    pub fn sink(&self) -> PrometheusSink {
        PrometheusSink {
            registry: Arc::clone(&self.registry),
            handles: Vec::new(),
        }
    }
}

enum Handle {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

pub struct PrometheusSink {
    registry: Arc<Registry>,
    /// Indexed by `MetricId`.
    handles: Vec<Option<Handle>>,
}

impl PrometheusSink {
    fn handle(&self, point: &SeriesPoint) -> Result<&Handle, ExportError> {
        self.handles
            .get(point.metric.0)
            .and_then(Option::as_ref)
            .ok_or(ExportError::UnknownMetric(point.metric.0))
    }
}

impl PullSink for PrometheusSink {
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        let labels: Vec<&str> = descriptor.label_names.iter().map(String::as_str).collect();
        let opts = Opts::new(descriptor.name.to_string(), descriptor.help.clone());

        let handle = match descriptor.kind {
            MetricKind::Counter => {
                let vec = CounterVec::new(opts, &labels)?;
                self.registry.register(Box::new(vec.clone()))?;
                Handle::Counter(vec)
            }
            MetricKind::Gauge => {
                let vec = GaugeVec::new(opts, &labels)?;
                self.registry.register(Box::new(vec.clone()))?;
                Handle::Gauge(vec)
            }
            MetricKind::Histogram | MetricKind::Summary => {
                // An empty boundary list would mean the crate's defaults; a
                // lone +Inf keeps count and sum only.
                let bounds = match &descriptor.buckets {
                    Some(layout) if !layout.bounds().is_empty() => layout.bounds().to_vec(),
                    _ => vec![f64::INFINITY],
                };
                let opts = HistogramOpts::from(opts).buckets(bounds);
                let vec = HistogramVec::new(opts, &labels)?;
                self.registry.register(Box::new(vec.clone()))?;
                Handle::Histogram(vec)
            }
        };

        let idx = descriptor.id.0;
        if self.handles.len() <= idx {
            self.handles.resize_with(idx + 1, || None);
        }
        self.handles[idx] = Some(handle);
        debug!("PrometheusRegistry: registered {} ({})", descriptor.name, descriptor.kind);
        Ok(())
    }

    fn write(&mut self, point: &SeriesPoint, write: PullWrite) -> Result<(), ExportError> {
        let values = point.labels.values();
        match (self.handle(point)?, write) {
            (Handle::Counter(vec), PullWrite::Set(value)) => {
                if !value.is_finite() || value < 0.0 {
                    return Err(ExportError::Rejected(format!(
                        "counter '{}' cannot hold {}",
                        point.name, value
                    )));
                }
                let counter = vec.get_metric_with_label_values(&values)?;
                let current = counter.get();
                if value >= current {
                    counter.inc_by(value - current);
                } else {
                    counter.reset();
                    counter.inc_by(value);
                }
            }
            (Handle::Gauge(vec), PullWrite::Set(value)) => {
                vec.get_metric_with_label_values(&values)?.set(value);
            }
            (Handle::Histogram(vec), PullWrite::Observe(value)) => {
                vec.get_metric_with_label_values(&values)?.observe(value);
            }
            (_, write) => {
                return Err(ExportError::Rejected(format!(
                    "write {:?} does not match the registered kind of '{}'",
                    write, point.name
                )));
            }
        }
        Ok(())
    }
}
