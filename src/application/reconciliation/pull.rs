use super::{ExportReconciler, Registrations, prefixed};
use crate::domain::errors::ExportError;
use crate::domain::ports::{PullSink, PullWrite};
use crate::domain::types::{BucketLayout, MetricDescriptor, MetricId, MetricKind, SeriesPoint};

/// Absolute-value strategy. Counter and gauge values are set as given and
/// observations recorded as-is, so no per-series state is kept here.
pub struct PullReconciler {
    name: String,
    prefix: String,
    sink: Box<dyn PullSink>,
    registrations: Registrations,
}

impl PullReconciler {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        sink: Box<dyn PullSink>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            sink,
            registrations: Registrations::default(),
        }
    }
}

impl ExportReconciler for PullReconciler {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        self.registrations.insert(descriptor)?;
        self.sink.register(&prefixed(descriptor, &self.prefix))
    }

    fn reconcile(&mut self, point: &SeriesPoint, kind: MetricKind) -> Result<(), ExportError> {
        self.registrations.check(point, kind)?;
        let write = match kind {
            MetricKind::Counter | MetricKind::Gauge => PullWrite::Set(point.value),
            MetricKind::Histogram | MetricKind::Summary => PullWrite::Observe(point.value),
        };
        self.sink.write(point, write)
    }

    fn buckets(&self, metric: MetricId) -> Option<&BucketLayout> {
        self.registrations.get(metric).and_then(|r| r.buckets.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::labels::LabelSet;
    use crate::domain::types::SeriesId;
    use crate::infrastructure::observability::memory::MemoryPullSink;
    use std::sync::Arc;

    fn point(metric: usize, value: f64) -> SeriesPoint {
        SeriesPoint::new(
            MetricId(metric),
            SeriesId(0),
            Arc::from("requests"),
            Arc::new(LabelSet::new(vec![("region".into(), "us".into())])),
            value,
        )
    }

    fn unprefixed() -> PullReconciler {
        PullReconciler::new("prometheus", "", Box::new(MemoryPullSink::default()))
    }

    #[test]
    fn test_counter_and_gauge_are_set_verbatim() {
        let sink = MemoryPullSink::default();
        let mut reconciler = PullReconciler::new("prometheus", "prom_", Box::new(sink.clone()));
        let counter = MetricDescriptor::new(
            MetricId(0),
            "requests",
            MetricKind::Counter,
            vec!["region".into()],
        );
        reconciler.register(&counter).unwrap();

        for value in [5.0, 12.0, 18.0, 25.0, 25.0] {
            reconciler.reconcile(&point(0, value), MetricKind::Counter).unwrap();
        }

        let writes = sink.writes();
        assert_eq!(writes.len(), 5);
        assert_eq!(writes.last().map(|w| w.write), Some(PullWrite::Set(25.0)));
        assert_eq!(sink.registered_names(), vec!["prom_requests".to_string()]);
    }

    #[test]
    fn test_unregistered_metric_rejected() {
        let mut reconciler = unprefixed();
        let err = reconciler.reconcile(&point(3, 1.0), MetricKind::Gauge).unwrap_err();
        assert!(matches!(err, ExportError::UnknownMetric(3)));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut reconciler = unprefixed();
        let gauge = MetricDescriptor::new(
            MetricId(0),
            "requests",
            MetricKind::Gauge,
            vec!["region".into()],
        );
        reconciler.register(&gauge).unwrap();
        assert!(reconciler.reconcile(&point(0, 1.0), MetricKind::Counter).is_err());
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut reconciler = unprefixed();
        let gauge = MetricDescriptor::new(MetricId(0), "requests", MetricKind::Gauge, vec![]);
        reconciler.register(&gauge).unwrap();
        assert!(matches!(
            reconciler.register(&gauge),
            Err(ExportError::AlreadyRegistered { .. })
        ));
    }
}
