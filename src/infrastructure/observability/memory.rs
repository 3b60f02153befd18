//! In-memory sinks. Used by the dry-run mode and by tests to inspect exactly
//! what each protocol would have received.

use crate::domain::errors::ExportError;
use crate::domain::labels::SeriesKey;
use crate::domain::ports::{PullSink, PullWrite, PushSink, PushWrite};
use crate::domain::types::{MetricDescriptor, MetricId, SeriesId, SeriesPoint};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<W> {
    pub metric: MetricId,
    pub series: SeriesId,
    pub key: SeriesKey,
    pub write: W,
}

#[derive(Debug)]
struct Log<W> {
    registered: Vec<MetricDescriptor>,
    writes: Vec<Recorded<W>>,
    fail_writes: bool,
}

impl<W> Default for Log<W> {
    fn default() -> Self {
        Self {
            registered: Vec::new(),
            writes: Vec::new(),
            fail_writes: false,
        }
    }
}

/// Cloneable handle; every clone shares the same log.
#[derive(Debug)]
struct Shared<W>(Arc<Mutex<Log<W>>>);

impl<W> Clone for Shared<W> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<W> Default for Shared<W> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Log::default())))
    }
}

impl<W: Clone> Shared<W> {
    fn lock(&self) -> MutexGuard<'_, Log<W>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failing() -> Self {
        let shared = Self::default();
        shared.lock().fail_writes = true;
        shared
    }

    fn register(&self, descriptor: &MetricDescriptor) {
        self.lock().registered.push(descriptor.clone());
    }

    fn record(&self, point: &SeriesPoint, write: W) -> Result<(), ExportError> {
        let mut log = self.lock();
        if log.fail_writes {
            return Err(ExportError::Transport("memory sink configured to fail".to_string()));
        }
        log.writes.push(Recorded {
            metric: point.metric,
            series: point.series,
            key: point.series_key(),
            write,
        });
        Ok(())
    }

    fn writes(&self) -> Vec<Recorded<W>> {
        self.lock().writes.clone()
    }

    fn registered(&self) -> Vec<MetricDescriptor> {
        self.lock().registered.clone()
    }
}

/// Records every absolute write.
#[derive(Debug, Clone, Default)]
pub struct MemoryPullSink {
    shared: Shared<PullWrite>,
}

impl MemoryPullSink {
    /// Every write fails with a transport error.
    pub fn failing() -> Self {
        Self {
            shared: Shared::failing(),
        }
    }

    pub fn writes(&self) -> Vec<Recorded<PullWrite>> {
        self.shared.writes()
    }

    pub fn registered(&self) -> Vec<MetricDescriptor> {
        self.shared.registered()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registered().iter().map(|d| d.name.to_string()).collect()
    }

    /// Last value set per counter/gauge series, keyed by series key.
    pub fn latest(&self) -> BTreeMap<String, f64> {
        let mut latest = BTreeMap::new();
        for recorded in self.shared.lock().writes.iter() {
            if let PullWrite::Set(value) = recorded.write {
                latest.insert(recorded.key.as_str().to_string(), value);
            }
        }
        latest
    }

    /// Last value set per series of one metric, in series order.
    pub fn latest_for(&self, metric: MetricId) -> Vec<f64> {
        let mut latest = BTreeMap::new();
        for recorded in self.shared.lock().writes.iter().filter(|r| r.metric == metric) {
            if let PullWrite::Set(value) = recorded.write {
                latest.insert(recorded.series, value);
            }
        }
        latest.into_values().collect()
    }

    /// All observations recorded for one metric, in write order.
    pub fn observations(&self, metric: MetricId) -> Vec<f64> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter(|r| r.metric == metric)
            .filter_map(|r| match r.write {
                PullWrite::Observe(v) => Some(v),
                PullWrite::Set(_) => None,
            })
            .collect()
    }
}

impl PullSink for MemoryPullSink {
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        self.shared.register(descriptor);
        Ok(())
    }

    fn write(&mut self, point: &SeriesPoint, write: PullWrite) -> Result<(), ExportError> {
        self.shared.record(point, write)
    }
}

/// Records every delta and observation.
#[derive(Debug, Clone, Default)]
pub struct MemoryPushSink {
    shared: Shared<PushWrite>,
}

impl MemoryPushSink {
    /// Every write fails with a transport error.
    pub fn failing() -> Self {
        Self {
            shared: Shared::failing(),
        }
    }

    pub fn writes(&self) -> Vec<Recorded<PushWrite>> {
        self.shared.writes()
    }

    pub fn registered(&self) -> Vec<MetricDescriptor> {
        self.shared.registered()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registered().iter().map(|d| d.name.to_string()).collect()
    }

    /// `Add` payloads in write order, across all series.
    pub fn deltas(&self) -> Vec<f64> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter_map(|r| match r.write {
                PushWrite::Add(v) => Some(v),
                PushWrite::Record(_) => None,
            })
            .collect()
    }

    /// Sum of deltas per series: what a collector would hold.
    pub fn running_totals(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for recorded in self.shared.lock().writes.iter() {
            if let PushWrite::Add(delta) = recorded.write {
                *totals.entry(recorded.key.as_str().to_string()).or_insert(0.0) += delta;
            }
        }
        totals
    }

    pub fn observations(&self, metric: MetricId) -> Vec<f64> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter(|r| r.metric == metric)
            .filter_map(|r| match r.write {
                PushWrite::Record(v) => Some(v),
                PushWrite::Add(_) => None,
            })
            .collect()
    }
}

impl PushSink for MemoryPushSink {
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        self.shared.register(descriptor);
        Ok(())
    }

    fn write(&mut self, point: &SeriesPoint, write: PushWrite) -> Result<(), ExportError> {
        self.shared.record(point, write)
    }
}
