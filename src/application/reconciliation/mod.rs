//! Cross-protocol export reconciliation.
//!
//! Generators emit logical values: cumulative counters, absolute gauges and
//! raw observations. Each reconciler turns that stream into what its
//! protocol accepts. The pull side writes values as given; the push side
//! keeps per-series bookkeeping of what the collector already believes and
//! sends only deltas.

pub mod pull;
pub mod push;

pub use pull::PullReconciler;
pub use push::PushReconciler;

use crate::domain::errors::ExportError;
use crate::domain::types::{
    BucketLayout, MetricBatch, MetricDescriptor, MetricId, MetricKind, SeriesPoint,
};

/// One export target. Owned by the orchestrator context; never shared.
pub trait ExportReconciler: Send {
    /// Exporter label used in logs and in `gen_export_errors_total`.
    fn name(&self) -> &str;

    /// Called once per metric before the first tick.
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError>;

    fn reconcile(&mut self, point: &SeriesPoint, kind: MetricKind) -> Result<(), ExportError>;

    /// Bucket layout this reconciler registered for `metric`, if any.
    fn buckets(&self, metric: MetricId) -> Option<&BucketLayout>;

    /// Stops at the first failing point; the remaining points of the batch
    /// are dropped for this exporter only.
    fn reconcile_batch(&mut self, batch: &MetricBatch) -> Result<(), ExportError> {
        for point in &batch.points {
            self.reconcile(point, batch.kind)?;
        }
        Ok(())
    }

    /// Bucket an observation would land in on this exporter.
    fn bucket_index(&self, metric: MetricId, value: f64) -> Option<usize> {
        self.buckets(metric).map(|layout| layout.index_of(value))
    }
}

/// Registration bookkeeping shared by both strategies, indexed by `MetricId`.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    slots: Vec<Option<Registered>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Registered {
    pub(crate) kind: MetricKind,
    pub(crate) label_count: usize,
    pub(crate) buckets: Option<BucketLayout>,
}

impl Registrations {
    pub(crate) fn insert(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        let idx = descriptor.id.0;
        if self.slots.len() <= idx {
            self.slots.resize(idx + 1, None);
        }
        if self.slots[idx].is_some() {
            return Err(ExportError::AlreadyRegistered {
                name: descriptor.name.to_string(),
            });
        }
        self.slots[idx] = Some(Registered {
            kind: descriptor.kind,
            label_count: descriptor.label_names.len(),
            buckets: descriptor.buckets.clone(),
        });
        Ok(())
    }

    pub(crate) fn get(&self, metric: MetricId) -> Option<&Registered> {
        self.slots.get(metric.0).and_then(Option::as_ref)
    }

    /// Registered entry for the point, checked against the batch kind and the
    /// registered label arity.
    pub(crate) fn check(
        &self,
        point: &SeriesPoint,
        kind: MetricKind,
    ) -> Result<&Registered, ExportError> {
        let registered = self
            .get(point.metric)
            .ok_or(ExportError::UnknownMetric(point.metric.0))?;
        if registered.kind != kind {
            return Err(ExportError::Rejected(format!(
                "metric '{}' registered as {} but written as {}",
                point.name, registered.kind, kind
            )));
        }
        if registered.label_count != point.labels.len() {
            return Err(ExportError::LabelMismatch {
                name: point.name.to_string(),
                expected: registered.label_count,
                actual: point.labels.len(),
            });
        }
        Ok(registered)
    }
}

/// Copy of `descriptor` with `prefix` prepended to the name.
pub(crate) fn prefixed(descriptor: &MetricDescriptor, prefix: &str) -> MetricDescriptor {
    let mut exported = descriptor.clone();
    exported.name = format!("{}{}", prefix, descriptor.name).into();
    exported
}
