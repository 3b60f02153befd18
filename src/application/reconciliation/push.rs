use super::{ExportReconciler, Registrations, prefixed};
use crate::domain::errors::ExportError;
use crate::domain::ports::{PushSink, PushWrite};
use crate::domain::types::{BucketLayout, MetricDescriptor, MetricId, MetricKind, SeriesPoint};
use tracing::info;

/// Delta strategy for collectors whose instruments only accept increments.
///
/// Per series it tracks the value the collector currently believes, starting
/// at 0, and sends `incoming - tracked`:
/// - counter: positive deltas only; a decrease is read as an upstream reset
///   and the whole incoming value is resent as the delta. A noisy generator
///   that dips briefly is indistinguishable from a reset and will overcount.
/// - gauge: any non-zero delta, up or down.
/// - histogram/summary: observations pass through untouched.
pub struct PushReconciler {
    name: String,
    prefix: String,
    sink: Box<dyn PushSink>,
    registrations: Registrations,
    /// `tracked[metric][series]`, grown lazily on first sight of a series.
    tracked: Vec<Vec<f64>>,
}

impl PushReconciler {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        sink: Box<dyn PushSink>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            sink,
            registrations: Registrations::default(),
            tracked: Vec::new(),
        }
    }

    /// What the collector currently believes for a series (0 if never sent).
    pub fn tracked_value(&self, metric: MetricId, series: usize) -> f64 {
        self.tracked
            .get(metric.0)
            .and_then(|slots| slots.get(series))
            .copied()
            .unwrap_or(0.0)
    }

    fn slot(&mut self, point: &SeriesPoint) -> &mut f64 {
        let metric = point.metric.0;
        let series = point.series.0;
        if self.tracked.len() <= metric {
            self.tracked.resize_with(metric + 1, Vec::new);
        }
        let slots = &mut self.tracked[metric];
        if slots.len() <= series {
            slots.resize(series + 1, 0.0);
        }
        &mut slots[series]
    }
}

/// Delta to send for a counter, or `None` when nothing must be sent.
/// Returns `(delta, reset)`.
fn counter_delta(tracked: f64, incoming: f64) -> Option<(f64, bool)> {
    let delta = incoming - tracked;
    if delta > 0.0 {
        Some((delta, false))
    } else if delta < 0.0 {
        // Reset: rebase on the post-reset value.
        if incoming > 0.0 {
            Some((incoming, true))
        } else {
            None
        }
    } else {
        None
    }
}

impl ExportReconciler for PushReconciler {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        self.registrations.insert(descriptor)?;
        self.sink.register(&prefixed(descriptor, &self.prefix))
    }

    fn reconcile(&mut self, point: &SeriesPoint, kind: MetricKind) -> Result<(), ExportError> {
        self.registrations.check(point, kind)?;
        let incoming = point.value;

        match kind {
            MetricKind::Histogram | MetricKind::Summary => {
                self.sink.write(point, PushWrite::Record(incoming))
            }
            MetricKind::Counter | MetricKind::Gauge if !incoming.is_finite() => {
                Err(ExportError::Rejected(format!(
                    "non-finite {} value for '{}'",
                    kind, point.name
                )))
            }
            MetricKind::Counter => {
                let tracked = *self.slot(point);
                let Some((delta, reset)) = counter_delta(tracked, incoming) else {
                    if incoming < tracked {
                        // Reset to zero: nothing to send, but rebase.
                        *self.slot(point) = incoming;
                    }
                    return Ok(());
                };
                if reset {
                    info!(
                        "PushReconciler[{}]: counter reset on {} ({} -> {}), rebasing",
                        self.name,
                        point.series_key(),
                        tracked,
                        incoming
                    );
                }
                self.sink.write(point, PushWrite::Add(delta))?;
                *self.slot(point) = incoming;
                Ok(())
            }
            MetricKind::Gauge => {
                let tracked = *self.slot(point);
                let delta = incoming - tracked;
                if delta == 0.0 {
                    return Ok(());
                }
                self.sink.write(point, PushWrite::Add(delta))?;
                *self.slot(point) = incoming;
                Ok(())
            }
        }
    }

    fn buckets(&self, metric: MetricId) -> Option<&BucketLayout> {
        self.registrations.get(metric).and_then(|r| r.buckets.as_ref())
    }
}
