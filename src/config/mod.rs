//! Configuration for synthmetrics.
//!
//! Loaded once from a TOML document, overridden from the environment, then
//! validated. Anything that fails here is fatal: the generator never starts
//! ticking with an invalid configuration.

mod exporter_config;
mod metric_config;

pub use exporter_config::{ExportersConfig, PrometheusExporterConfig, PushExporterConfig};
pub use metric_config::{MetricConfig, RuntimeAction, RuntimeConfig};

use crate::domain::cardinality::CardinalityProfile;
use crate::domain::errors::ConfigError;
use crate::domain::labels::{validate_label_name, validate_metric_name};
use crate::domain::types::BucketLayout;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const SPIKE_ACTION: &str = "spike";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub tick_interval_s: f64,
    pub seed: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: 1.0,
            seed: 42,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl GlobalConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub exporters: ExportersConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, CardinalityProfile>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Reads, overrides from the environment, and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses without environment overrides or validation.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// `LOG_LEVEL` and `PUSH_ENDPOINT` override the file.
    pub fn apply_env(&mut self) {
        if let Ok(level) = env::var("LOG_LEVEL")
            && !level.trim().is_empty()
        {
            self.global.log_level = level.trim().to_string();
        }
        self.exporters.push.apply_env();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.global.tick_interval_s.is_finite() || self.global.tick_interval_s <= 0.0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        if self.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        for (name, profile) in &self.profiles {
            if profile.series_cap == Some(0) {
                return Err(ConfigError::InvalidSeriesCap {
                    profile: name.clone(),
                });
            }
            for (label, spec) in profile.labels.iter() {
                validate_label_name(label)?;
                spec.resolve(label)?;
            }
        }

        let mut seen = HashSet::new();
        for metric in &self.metrics {
            validate_metric_name(&metric.name)?;
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric {
                    name: metric.name.clone(),
                });
            }
            if let Some(key) = metric.unknown.keys().next() {
                return Err(ConfigError::UnknownParameter {
                    metric: metric.name.clone(),
                    key: key.clone(),
                });
            }
            if let Some(profile) = &metric.profile
                && !self.profiles.contains_key(profile)
            {
                return Err(ConfigError::UnknownProfile {
                    metric: metric.name.clone(),
                    profile: profile.clone(),
                });
            }
            if let Some(overrides) = &metric.labels {
                for (label, spec) in overrides.iter() {
                    validate_label_name(label)?;
                    spec.resolve(label)?;
                }
            }
            if let Some(buckets) = &metric.buckets
                && BucketLayout::new(buckets.clone()).is_none()
            {
                return Err(ConfigError::InvalidBuckets {
                    metric: metric.name.clone(),
                });
            }
        }

        for action in &self.runtime.on_start {
            if action.action != SPIKE_ACTION {
                return Err(ConfigError::UnknownRuntimeAction {
                    action: action.action.clone(),
                });
            }
            let target = action.metric.as_deref().unwrap_or_default();
            if !seen.contains(target) {
                return Err(ConfigError::UnknownActionTarget {
                    action: action.action.clone(),
                    metric: target.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Profile a metric expands against; the empty profile when it names none.
    pub fn profile_for(&self, metric: &MetricConfig) -> Option<&CardinalityProfile> {
        match &metric.profile {
            Some(name) => self.profiles.get(name),
            None => Some(&EMPTY_PROFILE),
        }
    }

    /// Seed for a metric's random stream.
    pub fn seed_for(&self, metric: &MetricConfig) -> u64 {
        metric.seed.unwrap_or(self.global.seed)
    }
}

static EMPTY_PROFILE: std::sync::LazyLock<CardinalityProfile> =
    std::sync::LazyLock::new(CardinalityProfile::default);
