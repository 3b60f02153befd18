//! Fixed-interval tick loop.
//!
//! Runs on a single task: every iteration generates all metrics in
//! configuration order, applies spike multipliers, and forwards each batch to
//! every reconciler. Failures are isolated per metric and per exporter.
//! Stop requests are only observed between iterations.

use crate::application::reconciliation::ExportReconciler;
use crate::application::self_metrics::SelfInstrumentation;
use crate::domain::generators::ValueGenerator;
use crate::domain::ports::MultiplierSource;
use crate::domain::types::MetricBatch;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

const PROGRESS_EVERY_TICKS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub timestamp: i64,
    pub points: usize,
    pub generation_errors: usize,
    pub export_errors: usize,
    pub elapsed: Duration,
}

/// Serializable view of a running orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub tick_count: u64,
    pub uptime_s: u64,
    pub metrics: usize,
    pub total_series: usize,
}

#[derive(Debug)]
struct StatusCell {
    running: AtomicBool,
    ticks: AtomicU64,
    started: Instant,
    metrics: usize,
    total_series: usize,
}

impl StatusCell {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: if self.running.load(Ordering::Relaxed) {
                RunState::Running
            } else {
                RunState::Idle
            },
            tick_count: self.ticks.load(Ordering::Relaxed),
            uptime_s: self.started.elapsed().as_secs(),
            metrics: self.metrics,
            total_series: self.total_series,
        }
    }
}

pub struct TickOrchestrator {
    interval: Duration,
    generators: Vec<ValueGenerator>,
    reconcilers: Vec<Box<dyn ExportReconciler>>,
    multipliers: Arc<dyn MultiplierSource>,
    instrumentation: SelfInstrumentation,
    state: RunState,
    status: Arc<StatusCell>,
}

impl TickOrchestrator {
    /// Metrics and reconcilers must already be registered with each other.
    pub fn new(
        interval: Duration,
        generators: Vec<ValueGenerator>,
        reconcilers: Vec<Box<dyn ExportReconciler>>,
        multipliers: Arc<dyn MultiplierSource>,
        instrumentation: SelfInstrumentation,
    ) -> Self {
        let status = Arc::new(StatusCell {
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            started: Instant::now(),
            metrics: generators.len(),
            total_series: generators.iter().map(ValueGenerator::series_count).sum(),
        });
        Self {
            interval,
            generators,
            reconcilers,
            multipliers,
            instrumentation,
            state: RunState::Idle,
            status,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn instrumentation(&self) -> &SelfInstrumentation {
        &self.instrumentation
    }

    pub fn reconciler_names(&self) -> Vec<String> {
        self.reconcilers.iter().map(|r| r.name().to_string()).collect()
    }

    /// Runs one full iteration for `timestamp` (unix seconds).
    pub fn tick_at(&mut self, timestamp: i64) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport {
            timestamp,
            ..TickReport::default()
        };

        let mut batches: Vec<(usize, MetricBatch)> = Vec::with_capacity(self.generators.len());
        for (idx, generator) in self.generators.iter_mut().enumerate() {
            let points = match generator.tick(timestamp) {
                Ok(points) => points,
                Err(e) => {
                    error!(
                        "TickOrchestrator: generation failed for {}, skipping this tick: {}",
                        generator.name(),
                        e
                    );
                    self.instrumentation.record_generation_error(idx);
                    report.generation_errors += 1;
                    continue;
                }
            };

            let multiplier = self.multipliers.current_multiplier(generator.name());
            let points = if multiplier != 1.0 {
                debug!("TickOrchestrator: applying spike x{} to {}", multiplier, generator.name());
                points.into_iter().map(|p| p.scaled(multiplier)).collect()
            } else {
                points
            };

            self.instrumentation.record_points(idx, points.len());
            report.points += points.len();
            batches.push((
                idx,
                MetricBatch {
                    metric: generator.metric(),
                    kind: generator.kind(),
                    points,
                },
            ));
        }

        for (exporter_idx, reconciler) in self.reconcilers.iter_mut().enumerate() {
            for (metric_idx, batch) in &batches {
                if let Err(e) = reconciler.reconcile_batch(batch) {
                    error!(
                        "TickOrchestrator: {} export failed for metric #{}: {}",
                        reconciler.name(),
                        batch.metric.0,
                        e
                    );
                    self.instrumentation.record_export_error(exporter_idx, *metric_idx);
                    report.export_errors += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        self.instrumentation.record_tick_duration(report.elapsed);
        self.export_self_metrics();

        let ticks = self.status.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks % PROGRESS_EVERY_TICKS == 0 {
            info!(
                "TickOrchestrator: {} ticks, last tick {} points in {}ms",
                ticks,
                report.points,
                report.elapsed.as_millis()
            );
        }

        report
    }

    fn export_self_metrics(&mut self) {
        let batches = self.instrumentation.batches();
        for reconciler in self.reconcilers.iter_mut() {
            for batch in &batches {
                if let Err(e) = reconciler.reconcile_batch(batch) {
                    warn!("TickOrchestrator: {} self-metric export failed: {}", reconciler.name(), e);
                }
            }
        }
    }

    /// Loops until `stop` flips to true (or its sender is dropped), then
    /// returns itself in the Idle state.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        self.state = RunState::Running;
        self.status.running.store(true, Ordering::Relaxed);
        info!(
            "TickOrchestrator: started ({} metrics, {} exporters, every {}ms)",
            self.generators.len(),
            self.reconcilers.len(),
            self.interval.as_millis()
        );

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            let iteration_start = Instant::now();
            self.tick_at(Utc::now().timestamp());
            let elapsed = iteration_start.elapsed();

            if elapsed > self.interval {
                warn!(
                    "TickOrchestrator: tick took {}ms, over the {}ms interval, continuing immediately",
                    elapsed.as_millis(),
                    self.interval.as_millis()
                );
                // No catch-up burst; the next tick starts now.
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval - elapsed) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state = RunState::Idle;
        self.status.running.store(false, Ordering::Relaxed);
        info!(
            "TickOrchestrator: stopped after {} ticks",
            self.status.ticks.load(Ordering::Relaxed)
        );
        self
    }

    /// Moves the loop onto its own task.
    pub fn spawn(self) -> OrchestratorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let status = Arc::clone(&self.status);
        let task = tokio::spawn(self.run(stop_rx));
        OrchestratorHandle {
            stop: stop_tx,
            task,
            status,
        }
    }
}

/// Owner of a spawned orchestrator.
pub struct OrchestratorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<TickOrchestrator>,
    status: Arc<StatusCell>,
}

impl OrchestratorHandle {
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Requests a stop and waits for the in-flight iteration to finish. No
    /// generation or export happens after this returns.
    pub async fn stop(self) -> Result<TickOrchestrator, JoinError> {
        // Err only if the loop already exited and dropped its receiver.
        let _ = self.stop.send(true);
        self.task.await
    }
}
