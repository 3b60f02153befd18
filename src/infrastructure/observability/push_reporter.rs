//! Push-model sink and its periodic flusher.
//!
//! Reconciled deltas and observations accumulate per series between
//! flushes. Every `export_interval_s` the buffer is drained into one JSON
//! batch that is POSTed to the configured collector endpoint, or printed to
//! stdout with a `PUSH_JSON:` prefix when no endpoint is set.

use crate::config::PushExporterConfig;
use crate::domain::errors::ExportError;
use crate::domain::labels::SeriesKey;
use crate::domain::ports::{PushSink, PushWrite};
use crate::domain::types::{BucketLayout, MetricDescriptor, MetricKind, SeriesPoint};
use crate::infrastructure::http_client_factory::HttpClientFactory;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Added to the resource attributes unless the configuration sets it.
pub const INSTANCE_ID_ATTRIBUTE: &str = "service.instance.id";

/// One flush worth of data.
#[derive(Debug, Clone, Serialize)]
pub struct PushBatch {
    pub timestamp: String,
    pub resource: BTreeMap<String, String>,
    pub metrics: Vec<PushMetric>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMetric {
    pub name: String,
    pub kind: MetricKind,
    pub description: String,
    pub series: Vec<PushSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushSeries {
    pub labels: BTreeMap<String, String>,
    /// Sum of deltas since the previous flush (counters and gauges).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Observations since the previous flush (histograms and summaries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<ObservationBuckets>,
}

/// Explicit-bucket aggregation; `counts` has one more entry than `bounds`
/// for the implicit `+Inf` bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationBuckets {
    pub count: u64,
    pub sum: f64,
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone)]
enum Pending {
    Delta(f64),
    Observations(ObservationBuckets),
}

impl Pending {
    /// Folds `other` (older, undelivered data) into `self`.
    fn merge(&mut self, other: Pending) {
        match (self, other) {
            (Pending::Delta(total), Pending::Delta(delta)) => *total += delta,
            (Pending::Observations(obs), Pending::Observations(older)) => {
                obs.count += older.count;
                obs.sum += older.sum;
                for (count, old) in obs.counts.iter_mut().zip(older.counts) {
                    *count += old;
                }
            }
            // A series never changes kind after registration.
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
struct SeriesBuffer {
    labels: BTreeMap<String, String>,
    pending: Pending,
}

#[derive(Debug)]
struct MetricBuffer {
    name: String,
    kind: MetricKind,
    description: String,
    buckets: Option<BucketLayout>,
    series: BTreeMap<SeriesKey, SeriesBuffer>,
}

#[derive(Debug, Default)]
struct Buffer {
    /// Indexed by `MetricId`.
    metrics: Vec<Option<MetricBuffer>>,
}

type SharedBuffer = Arc<Mutex<Buffer>>;

fn lock(shared: &SharedBuffer) -> MutexGuard<'_, Buffer> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write side handed to the push reconciler.
pub struct PushReporterSink {
    buffer: SharedBuffer,
}

impl PushSink for PushReporterSink {
    fn register(&mut self, descriptor: &MetricDescriptor) -> Result<(), ExportError> {
        let mut buffer = lock(&self.buffer);
        let idx = descriptor.id.0;
        if buffer.metrics.len() <= idx {
            buffer.metrics.resize_with(idx + 1, || None);
        }
        buffer.metrics[idx] = Some(MetricBuffer {
            name: descriptor.name.to_string(),
            kind: descriptor.kind,
            description: descriptor.help.clone(),
            buckets: descriptor.buckets.clone(),
            series: BTreeMap::new(),
        });
        Ok(())
    }

    fn write(&mut self, point: &SeriesPoint, write: PushWrite) -> Result<(), ExportError> {
        let mut buffer = lock(&self.buffer);
        let metric = buffer
            .metrics
            .get_mut(point.metric.0)
            .and_then(Option::as_mut)
            .ok_or(ExportError::UnknownMetric(point.metric.0))?;

        let layout = metric.buckets.clone().unwrap_or_else(BucketLayout::inf_only);
        let series = metric
            .series
            .entry(point.series_key())
            .or_insert_with(|| SeriesBuffer {
                labels: point
                    .labels
                    .pairs()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                pending: match write {
                    PushWrite::Add(_) => Pending::Delta(0.0),
                    PushWrite::Record(_) => Pending::Observations(ObservationBuckets {
                        count: 0,
                        sum: 0.0,
                        bounds: layout.bounds().to_vec(),
                        counts: vec![0; layout.bounds().len() + 1],
                    }),
                },
            });

        match (&mut series.pending, write) {
            (Pending::Delta(total), PushWrite::Add(delta)) => *total += delta,
            (Pending::Observations(obs), PushWrite::Record(value)) => {
                obs.count += 1;
                obs.sum += value;
                let idx = layout.index_of(value).min(obs.counts.len() - 1);
                obs.counts[idx] += 1;
            }
            (_, write) => {
                return Err(ExportError::Rejected(format!(
                    "write {:?} does not match the buffered kind of '{}'",
                    write, point.name
                )));
            }
        }
        Ok(())
    }
}

/// Periodic flusher. Owns the read side of the buffer.
pub struct PushReporter {
    buffer: SharedBuffer,
    config: PushExporterConfig,
    client: Option<ClientWithMiddleware>,
    resource: BTreeMap<String, String>,
    start_time: Instant,
}

impl PushReporter {
    pub fn new(config: PushExporterConfig) -> Self {
        let timeout = Duration::from_secs(config.export_interval_s.clamp(1, 30));
        let client = config
            .endpoint
            .as_ref()
            .map(|_| HttpClientFactory::create_client(timeout));
        let mut resource = config.resource.clone();
        resource
            .entry(INSTANCE_ID_ATTRIBUTE.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string());
        Self {
            buffer: SharedBuffer::default(),
            config,
            client,
            resource,
            start_time: Instant::now(),
        }
    }

    pub fn sink(&self) -> PushReporterSink {
        PushReporterSink {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.export_interval_s.max(1))
    }

    /// Drains everything accumulated since the last call. `None` when there
    /// is nothing to send.
    pub fn take_batch(&self) -> Option<PushBatch> {
        let drained = self.drain();
        self.build_batch(&drained)
    }

    /// Sends one batch. Returns the number of series flushed.
    ///
    /// On failure the drained data goes back into the buffer so the next
    /// flush carries it; the reconciler never resends a delta it has
    /// already tracked.
    pub async fn flush(&self) -> Result<usize, ExportError> {
        let drained = self.drain();
        let Some(batch) = self.build_batch(&drained) else {
            return Ok(0);
        };
        let series: usize = batch.metrics.iter().map(|m| m.series.len()).sum();

        match self.send(&batch).await {
            Ok(()) => Ok(series),
            Err(e) => {
                self.restore(drained);
                Err(e)
            }
        }
    }

    fn drain(&self) -> Vec<(usize, BTreeMap<SeriesKey, SeriesBuffer>)> {
        let mut buffer = lock(&self.buffer);
        buffer
            .metrics
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, m)| m.as_mut().map(|m| (idx, m)))
            .filter(|(_, m)| !m.series.is_empty())
            .map(|(idx, m)| (idx, std::mem::take(&mut m.series)))
            .collect()
    }

    fn restore(&self, drained: Vec<(usize, BTreeMap<SeriesKey, SeriesBuffer>)>) {
        let mut buffer = lock(&self.buffer);
        for (idx, series) in drained {
            let Some(metric) = buffer.metrics.get_mut(idx).and_then(Option::as_mut) else {
                continue;
            };
            for (key, older) in series {
                match metric.series.get_mut(&key) {
                    Some(current) => current.pending.merge(older.pending),
                    None => {
                        metric.series.insert(key, older);
                    }
                }
            }
        }
    }

    fn build_batch(
        &self,
        drained: &[(usize, BTreeMap<SeriesKey, SeriesBuffer>)],
    ) -> Option<PushBatch> {
        if drained.is_empty() {
            return None;
        }
        let buffer = lock(&self.buffer);
        let metrics: Vec<PushMetric> = drained
            .iter()
            .filter_map(|(idx, series)| {
                let m = buffer.metrics.get(*idx)?.as_ref()?;
                Some(PushMetric {
                    name: m.name.clone(),
                    kind: m.kind,
                    description: m.description.clone(),
                    series: series
                        .values()
                        .map(|s| match &s.pending {
                            Pending::Delta(delta) => PushSeries {
                                labels: s.labels.clone(),
                                delta: Some(*delta),
                                observations: None,
                            },
                            Pending::Observations(obs) => PushSeries {
                                labels: s.labels.clone(),
                                delta: None,
                                observations: Some(obs.clone()),
                            },
                        })
                        .collect(),
                })
            })
            .collect();
        drop(buffer);

        if metrics.is_empty() {
            return None;
        }
        Some(PushBatch {
            timestamp: chrono::Utc::now().to_rfc3339(),
            resource: self.resource.clone(),
            metrics,
        })
    }

    async fn send(&self, batch: &PushBatch) -> Result<(), ExportError> {
        let json = serde_json::to_string(batch)?;

        match (&self.client, &self.config.endpoint) {
            (Some(client), Some(endpoint)) => {
                let mut request = client
                    .post(endpoint)
                    .header("Content-Type", "application/json");
                for (name, value) in &self.config.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request
                    .body(json)
                    .send()
                    .await
                    .map_err(|e| ExportError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(ExportError::Rejected(format!(
                        "collector returned {}",
                        response.status()
                    )));
                }
                debug!("PushReporter: batch delivered to {}", endpoint);
            }
            _ => {
                // Use a special prefix so logs can be easily filtered
                println!("PUSH_JSON:{}", json);
            }
        }
        Ok(())
    }

    async fn flush_logged(&self) {
        match self.flush().await {
            Ok(0) => {}
            Ok(series) => debug!(
                "PushReporter: flushed {} series (uptime {}s)",
                series,
                self.start_time.elapsed().as_secs()
            ),
            Err(e) => warn!("PushReporter: flush failed, retained for next interval: {}", e),
        }
    }

    /// Flushes every interval until `stop` flips, then flushes once more.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            "PushReporter: started (interval {}s, endpoint {})",
            self.interval().as_secs(),
            self.config.endpoint.as_deref().unwrap_or("stdout")
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => self.flush_logged().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.flush_logged().await;
        info!("PushReporter: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::labels::LabelSet;
    use crate::domain::types::{MetricId, SeriesId};

    fn point(metric: usize, series: usize, region: &str, value: f64) -> SeriesPoint {
        SeriesPoint::new(
            MetricId(metric),
            SeriesId(series),
            Arc::from("unused"),
            Arc::new(LabelSet::new(vec![("region".into(), region.into())])),
            value,
        )
    }

    fn reporter() -> (PushReporter, PushReporterSink) {
        let reporter = PushReporter::new(PushExporterConfig {
            resource: BTreeMap::from([("service.name".to_string(), "synth".to_string())]),
            ..PushExporterConfig::default()
        });
        let mut sink = reporter.sink();
        sink.register(&MetricDescriptor::new(
            MetricId(0),
            "otel_jobs_total",
            MetricKind::Counter,
            vec!["region".into()],
        ))
        .unwrap();
        sink.register(
            &MetricDescriptor::new(
                MetricId(1),
                "otel_latency",
                MetricKind::Histogram,
                vec!["region".into()],
            )
            .with_buckets(BucketLayout::new(vec![0.2, 1.0]).unwrap()),
        )
        .unwrap();
        (reporter, sink)
    }

    #[test]
    fn test_deltas_accumulate_between_flushes() {
        let (reporter, mut sink) = reporter();
        sink.write(&point(0, 0, "us", 5.0), PushWrite::Add(5.0)).unwrap();
        sink.write(&point(0, 0, "us", 12.0), PushWrite::Add(7.0)).unwrap();
        sink.write(&point(0, 1, "eu", 1.0), PushWrite::Add(1.0)).unwrap();

        let batch = reporter.take_batch().unwrap();
        assert_eq!(batch.resource.get("service.name").map(String::as_str), Some("synth"));
        assert!(batch.resource.contains_key(INSTANCE_ID_ATTRIBUTE));
        assert_eq!(batch.metrics.len(), 1);
        let deltas: Vec<Option<f64>> = batch.metrics[0].series.iter().map(|s| s.delta).collect();
        // Series are ordered by key: eu before us.
        assert_eq!(deltas, vec![Some(1.0), Some(12.0)]);

        assert!(reporter.take_batch().is_none());
    }

    #[test]
    fn test_observations_bucketed_with_registered_layout() {
        let (reporter, mut sink) = reporter();
        for v in [0.12, 0.14, 0.15, 0.16, 0.18, 0.5, 3.0] {
            sink.write(&point(1, 0, "us", v), PushWrite::Record(v)).unwrap();
        }
        let batch = reporter.take_batch().unwrap();
        let obs = batch.metrics[0].series[0].observations.clone().unwrap();
        assert_eq!(obs.count, 7);
        assert_eq!(obs.bounds, vec![0.2, 1.0]);
        assert_eq!(obs.counts, vec![5, 1, 1]);
    }

    #[test]
    fn test_unregistered_metric_rejected() {
        let (_reporter, mut sink) = reporter();
        assert!(sink.write(&point(7, 0, "us", 1.0), PushWrite::Add(1.0)).is_err());
    }

    #[test]
    fn test_batch_serializes_without_empty_fields() {
        let (reporter, mut sink) = reporter();
        sink.write(&point(0, 0, "us", 2.0), PushWrite::Add(2.0)).unwrap();
        let json = serde_json::to_string(&reporter.take_batch().unwrap()).unwrap();
        assert!(json.contains("\"delta\":2.0"));
        assert!(!json.contains("observations"));
        assert!(json.contains("\"kind\":\"counter\""));
    }

    #[test]
    fn test_flush_without_endpoint_reports_series_count() {
        let (reporter, mut sink) = reporter();
        sink.write(&point(0, 0, "us", 2.0), PushWrite::Add(2.0)).unwrap();
        sink.write(&point(0, 1, "eu", 4.0), PushWrite::Add(4.0)).unwrap();

        assert_eq!(tokio_test::block_on(reporter.flush()).unwrap(), 2);
        assert_eq!(tokio_test::block_on(reporter.flush()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_flush_keeps_deltas_for_next_batch() {
        use axum::{Router, http::StatusCode, routing::post};

        let app = Router::new().route("/v1/metrics", post(|| async { StatusCode::BAD_REQUEST }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let reporter = PushReporter::new(PushExporterConfig {
            endpoint: Some(format!("http://{}/v1/metrics", addr)),
            ..PushExporterConfig::default()
        });
        let mut sink = reporter.sink();
        sink.register(&MetricDescriptor::new(
            MetricId(0),
            "otel_jobs_total",
            MetricKind::Counter,
            vec!["region".into()],
        ))
        .unwrap();
        sink.register(
            &MetricDescriptor::new(
                MetricId(1),
                "otel_latency",
                MetricKind::Histogram,
                vec!["region".into()],
            )
            .with_buckets(BucketLayout::new(vec![0.2, 1.0]).unwrap()),
        )
        .unwrap();

        sink.write(&point(0, 0, "us", 5.0), PushWrite::Add(5.0)).unwrap();
        sink.write(&point(1, 0, "us", 0.1), PushWrite::Record(0.1)).unwrap();
        assert!(matches!(reporter.flush().await, Err(ExportError::Rejected(_))));

        sink.write(&point(0, 0, "us", 12.0), PushWrite::Add(7.0)).unwrap();
        sink.write(&point(1, 0, "us", 0.5), PushWrite::Record(0.5)).unwrap();

        let batch = reporter.take_batch().unwrap();
        assert_eq!(batch.metrics.len(), 2);
        assert_eq!(batch.metrics[0].series[0].delta, Some(12.0));
        let obs = batch.metrics[1].series[0].observations.clone().unwrap();
        assert_eq!(obs.count, 2);
        assert_eq!(obs.counts, vec![1, 1, 0]);
        assert!((obs.sum - 0.6).abs() < 1e-12);

        server.abort();
    }

    #[test]
    fn test_undelivered_series_restored_when_no_new_writes() {
        let (reporter, mut sink) = reporter();
        sink.write(&point(0, 0, "us", 3.0), PushWrite::Add(3.0)).unwrap();

        let drained = reporter.drain();
        assert!(reporter.take_batch().is_none());
        reporter.restore(drained);

        let batch = reporter.take_batch().unwrap();
        assert_eq!(batch.metrics[0].series[0].delta, Some(3.0));
    }

    #[tokio::test]
    async fn test_run_flushes_on_stop() {
        let (reporter, mut sink) = reporter();
        sink.write(&point(0, 0, "us", 2.0), PushWrite::Add(2.0)).unwrap();
        let buffer = Arc::clone(&reporter.buffer);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(reporter.run(stop_rx));
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let drained = lock(&buffer)
            .metrics
            .iter()
            .flatten()
            .all(|m| m.series.is_empty());
        assert!(drained);
    }
}
