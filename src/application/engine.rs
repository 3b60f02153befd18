//! Startup wiring.
//!
//! Turns a validated `Config` into a ready-to-run `TickOrchestrator`:
//! label spaces are expanded, generators built, every metric (self metrics
//! included) registered on every reconciler, and bucket layouts checked for
//! parity across reconcilers. Nothing here runs on the tick path.

use crate::application::orchestrator::TickOrchestrator;
use crate::application::reconciliation::{ExportReconciler, PullReconciler, PushReconciler};
use crate::application::self_metrics::SelfInstrumentation;
use crate::application::spikes::SpikeTable;
use crate::config::{Config, SPIKE_ACTION};
use crate::domain::cardinality::LabelSpaceBuilder;
use crate::domain::errors::ConfigError;
use crate::domain::generators::{GeneratorSpec, ValueGenerator};
use crate::domain::ports::{PullSink, PushSink};
use crate::domain::types::{BucketLayout, MetricDescriptor, MetricId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PULL_EXPORTER: &str = "prometheus";
pub const PUSH_EXPORTER: &str = "push";

/// Downstream sinks for the enabled exporters. A missing sink disables that
/// exporter even if the configuration enables it.
#[derive(Default)]
pub struct ExporterSinks {
    pub pull: Option<Box<dyn PullSink>>,
    pub push: Option<Box<dyn PushSink>>,
}

pub struct Engine {
    pub orchestrator: TickOrchestrator,
    pub spikes: SpikeTable,
    /// User metrics first, then self metrics; index equals `MetricId`.
    pub descriptors: Vec<MetricDescriptor>,
    /// Series per configured metric, in configuration order.
    pub series_counts: Vec<usize>,
}

impl Engine {
    /// Builds reconcilers for the exporters the configuration enables and
    /// wires them onto `sinks`.
    pub fn build(config: &Config, sinks: ExporterSinks) -> Result<Self, ConfigError> {
        let mut reconcilers: Vec<Box<dyn ExportReconciler>> = Vec::new();

        let pull = &config.exporters.prometheus;
        match sinks.pull {
            Some(sink) if pull.enabled => reconcilers.push(Box::new(PullReconciler::new(
                PULL_EXPORTER,
                pull.prefix.clone(),
                sink,
            ))),
            Some(_) => debug!("Engine: pull exporter disabled by configuration"),
            None => {}
        }

        let push = &config.exporters.push;
        match sinks.push {
            Some(sink) if push.enabled => reconcilers.push(Box::new(PushReconciler::new(
                PUSH_EXPORTER,
                push.prefix.clone(),
                sink,
            ))),
            Some(_) => debug!("Engine: push exporter disabled by configuration"),
            None => {}
        }

        if reconcilers.is_empty() {
            warn!("Engine: no exporter enabled, generated values will only feed self metrics");
        }

        Self::with_reconcilers(config, reconcilers)
    }

    /// Same as [`Engine::build`] with caller-supplied reconcilers.
    pub fn with_reconcilers(
        config: &Config,
        mut reconcilers: Vec<Box<dyn ExportReconciler>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut generators = Vec::with_capacity(config.metrics.len());
        let mut descriptors = Vec::with_capacity(config.metrics.len() + 4);

        for (idx, metric) in config.metrics.iter().enumerate() {
            let id = MetricId(idx);
            let profile = config
                .profile_for(metric)
                .ok_or_else(|| ConfigError::UnknownProfile {
                    metric: metric.name.clone(),
                    profile: metric.profile.clone().unwrap_or_default(),
                })?;

            let space = Arc::new(
                LabelSpaceBuilder::new(profile)
                    .with_overrides(metric.labels.as_ref())
                    .build()?,
            );
            if space.len() < space.uncapped_size() {
                info!(
                    "Engine: series cap applied to {} ({} of {} combinations kept)",
                    metric.name,
                    space.len(),
                    space.uncapped_size()
                );
            }

            let mut descriptor =
                MetricDescriptor::new(id, &metric.name, metric.kind, space.label_names().to_vec());
            if let Some(help) = &metric.help {
                descriptor = descriptor.with_help(help.clone());
            }
            if let Some(bounds) = &metric.buckets {
                let layout = BucketLayout::new(bounds.clone()).ok_or_else(|| {
                    ConfigError::InvalidBuckets {
                        metric: metric.name.clone(),
                    }
                })?;
                descriptor = descriptor.with_buckets(layout);
            }

            let generator = ValueGenerator::build(
                GeneratorSpec {
                    metric: id,
                    name: &metric.name,
                    kind: metric.kind,
                    algorithm: metric.algorithm.as_deref(),
                    params: &metric.params,
                    seed: config.seed_for(metric),
                },
                space,
            )?;

            generators.push(generator);
            descriptors.push(descriptor);
        }

        let exporter_names: Vec<String> =
            reconcilers.iter().map(|r| r.name().to_string()).collect();
        let exporter_refs: Vec<&str> = exporter_names.iter().map(String::as_str).collect();
        let series: Vec<(&str, usize)> = generators
            .iter()
            .map(|g| (g.name(), g.series_count()))
            .collect();
        let instrumentation =
            SelfInstrumentation::new(MetricId(descriptors.len()), &series, &exporter_refs);
        descriptors.extend(instrumentation.descriptors().iter().cloned());

        for reconciler in reconcilers.iter_mut() {
            for descriptor in &descriptors {
                reconciler.register(descriptor)?;
            }
        }
        check_bucket_parity(&descriptors, &reconcilers)?;

        let spikes = SpikeTable::new();
        for action in &config.runtime.on_start {
            if action.action != SPIKE_ACTION {
                return Err(ConfigError::UnknownRuntimeAction {
                    action: action.action.clone(),
                });
            }
            let metric = action.metric.as_deref().unwrap_or_default();
            let multiplier = action.multiplier.ok_or_else(|| ConfigError::InvalidParameter {
                metric: metric.to_string(),
                param: "multiplier",
                reason: "spike action requires a multiplier".to_string(),
            })?;
            spikes.set(metric, multiplier, action.duration_s.map(Duration::from_secs))?;
        }

        let series_counts: Vec<usize> =
            generators.iter().map(ValueGenerator::series_count).collect();
        let total_series: usize = series_counts.iter().sum();
        info!(
            "Engine: ready with {} metrics, {} series, exporters {:?} (tick {}s, seed {})",
            generators.len(),
            total_series,
            exporter_names,
            config.global.tick_interval_s,
            config.global.seed
        );
        for generator in &generators {
            info!(
                "Engine: configured {} ({}, {} series)",
                generator.name(),
                generator.kind(),
                generator.series_count()
            );
        }

        let orchestrator = TickOrchestrator::new(
            config.global.tick_interval(),
            generators,
            reconcilers,
            Arc::new(spikes.clone()),
            instrumentation,
        );

        Ok(Self {
            orchestrator,
            spikes,
            descriptors,
            series_counts,
        })
    }
}

/// Every reconciler must have registered exactly the descriptor's layout for
/// each observation metric.
pub fn check_bucket_parity(
    descriptors: &[MetricDescriptor],
    reconcilers: &[Box<dyn ExportReconciler>],
) -> Result<(), ConfigError> {
    for descriptor in descriptors.iter().filter(|d| d.kind.is_observation()) {
        let expected = descriptor.buckets.as_ref();
        for reconciler in reconcilers {
            let actual = reconciler.buckets(descriptor.id);
            if actual != expected {
                return Err(ConfigError::BucketMismatch {
                    metric: descriptor.name.to_string(),
                    left: expected.map_or_else(|| "none".to_string(), |l| l.to_string()),
                    right: format!(
                        "{}: {}",
                        reconciler.name(),
                        actual.map_or_else(|| "none".to_string(), |l| l.to_string())
                    ),
                });
            }
        }
    }
    Ok(())
}
