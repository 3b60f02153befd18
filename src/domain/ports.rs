use crate::domain::errors::ExportError;
use crate::domain::types::{MetricDescriptor, SeriesPoint};

/// Protocol-native write for an absolute-value registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PullWrite {
    /// Counter or gauge: the value as given.
    Set(f64),
    /// Histogram or summary observation.
    Observe(f64),
}

/// Protocol-native write for a delta-accumulating instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushWrite {
    /// Counter increment (always > 0) or gauge up/down delta (never 0).
    Add(f64),
    /// Histogram or summary observation.
    Record(f64),
}

/// Downstream pull exporter. Owns serving and text exposition; the core only
/// registers metrics and writes absolute values.
pub trait PullSink: Send {
    /// `descriptor.name` already carries the exporter prefix.
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError>;
    fn write(&mut self, point: &SeriesPoint, write: PullWrite) -> Result<(), ExportError>;
}

/// Downstream push exporter. Owns batching, flush cadence and wire encoding.
pub trait PushSink: Send {
    /// `descriptor.name` already carries the exporter prefix.
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError>;
    fn write(&mut self, point: &SeriesPoint, write: PushWrite) -> Result<(), ExportError>;
}

/// Read side of the spike override table.
pub trait MultiplierSource: Send + Sync {
    /// 1.0 when no override is active for `metric`.
    fn current_multiplier(&self, metric: &str) -> f64;
}
