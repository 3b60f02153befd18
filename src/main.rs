//! synthmetrics - synthetic telemetry generator
//!
//! Generates configurable counters, gauges, histograms and summaries and
//! exposes the same logical values through a Prometheus scrape endpoint and a
//! push reporter.
//!
//! # Usage
//! ```sh
//! synthmetrics --config config/synthmetrics.toml
//! synthmetrics --config config/synthmetrics.toml --dry-run 60
//! ```
//!
//! # Environment Variables
//! - `RUST_LOG` - Log filter (overrides `global.log_level`)
//! - `LOG_LEVEL` - Overrides `global.log_level`
//! - `PUSH_ENDPOINT` - Overrides `exporters.push.endpoint`

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use synthmetrics::application::engine::{Engine, ExporterSinks};
use synthmetrics::application::self_metrics::GENERATOR_EXPORTER;
use synthmetrics::config::{Config, GlobalConfig, LogFormat};
use synthmetrics::domain::ports::{PullSink, PushSink};
use synthmetrics::domain::types::{MetricId, MetricKind};
use synthmetrics::infrastructure::observability::{
    MemoryPullSink, MemoryPushSink, PrometheusRegistry, PushReporter, scrape_server,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "synthmetrics", version, about = "Synthetic telemetry generator")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config/synthmetrics.toml")]
    config: PathBuf,

    /// Run N ticks against in-memory exporters, print a summary and exit
    #[arg(long, value_name = "TICKS")]
    dry_run: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    init_tracing(&config.global);
    info!("synthmetrics {} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(ticks) = cli.dry_run {
        return dry_run(&config, ticks);
    }

    let registry = PrometheusRegistry::new();
    let reporter = PushReporter::new(config.exporters.push.clone());

    let prometheus = &config.exporters.prometheus;
    let push = &config.exporters.push;
    let sinks = ExporterSinks {
        pull: prometheus
            .enabled
            .then(|| Box::new(registry.sink()) as Box<dyn PullSink>),
        push: push
            .enabled
            .then(|| Box::new(reporter.sink()) as Box<dyn PushSink>),
    };
    let engine = Engine::build(&config, sinks).context("Failed to build generator engine")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut background = Vec::new();

    if prometheus.enabled {
        let addr = prometheus.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind scrape endpoint on {}", addr))?;
        let mut stop = stop_rx.clone();
        let shutdown = async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };
        background.push(tokio::spawn(async move {
            if let Err(e) = scrape_server::serve(listener, registry, shutdown).await {
                warn!("Scrape endpoint terminated: {}", e);
            }
        }));
    }

    if push.enabled {
        background.push(tokio::spawn(reporter.run(stop_rx.clone())));
    } else {
        info!("Push exporter disabled.");
    }

    let handle = engine.orchestrator.spawn();
    info!("Generator running. Press Ctrl+C to shutdown.");

    shutdown_signal().await;

    // Orchestrator first so the final push flush sees the last tick.
    let orchestrator = handle.stop().await.context("Tick loop panicked")?;
    let _ = stop_tx.send(true);
    for task in background {
        if let Err(e) = task.await {
            warn!("Background task failed during shutdown: {}", e);
        }
    }

    let status = serde_json::to_string(&orchestrator.status())?;
    info!("Shutdown complete. Status: {}", status);
    Ok(())
}

fn init_tracing(global: &GlobalConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&global.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match global.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler installation failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler installation failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received. Stopping...");
}

fn dry_run(config: &Config, ticks: u64) -> Result<()> {
    // Both sides always run so their outputs can be compared.
    let mut config = config.clone();
    config.exporters.prometheus.enabled = true;
    config.exporters.push.enabled = true;
    let config = &config;

    let pull = MemoryPullSink::default();
    let push = MemoryPushSink::default();
    let mut engine = Engine::build(
        config,
        ExporterSinks {
            pull: Some(Box::new(pull.clone())),
            push: Some(Box::new(push.clone())),
        },
    )
    .context("Failed to build generator engine")?;

    info!("Dry run: {} ticks, no network, synthetic timestamps", ticks);
    let start = Utc::now().timestamp();
    let step = config.global.tick_interval_s;
    let mut export_errors = 0;
    for i in 0..ticks {
        let timestamp = start + (i as f64 * step).round() as i64;
        let report = engine.orchestrator.tick_at(timestamp);
        export_errors += report.export_errors;
    }

    let instrumentation = engine.orchestrator.instrumentation();
    println!(
        "{:<32} {:<10} {:>7} {:>9} {:>7}  summary",
        "metric", "kind", "series", "points", "errors"
    );
    for (idx, metric) in config.metrics.iter().enumerate() {
        let id = MetricId(idx);
        let errors = instrumentation.errors_total(GENERATOR_EXPORTER, idx);
        let summary = match metric.kind {
            MetricKind::Counter | MetricKind::Gauge => {
                let values = pull.latest_for(id);
                describe_range("last", &values)
            }
            MetricKind::Histogram | MetricKind::Summary => {
                let values = pull.observations(id);
                describe_mean(&values)
            }
        };
        println!(
            "{:<32} {:<10} {:>7} {:>9} {:>7}  {}",
            metric.name,
            metric.kind.as_str(),
            engine.series_counts[idx],
            instrumentation.points_total(idx),
            errors,
            summary
        );
    }
    println!(
        "ticks={} push_writes={} export_errors={}",
        ticks,
        push.writes().len(),
        export_errors
    );
    Ok(())
}

fn describe_range(label: &str, values: &[f64]) -> String {
    if values.is_empty() {
        return "no values".to_string();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    format!("{} min={:.3} max={:.3}", label, min, max)
}

fn describe_mean(values: &[f64]) -> String {
    if values.is_empty() {
        return "no observations".to_string();
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    format!("count={} mean={:.4}", values.len(), mean)
}
