//! `[[metrics]]` entries and `[runtime]` actions.

use crate::domain::cardinality::LabelDimensions;
use crate::domain::generators::AlgorithmParams;
use crate::domain::types::MetricKind;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Omitted means no profile dimensions, only `labels` overrides.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    /// Per-metric label dimensions; win over the profile's on name collision.
    #[serde(default)]
    pub labels: Option<LabelDimensions>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Histogram/summary boundaries, shared by both exporters.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
    #[serde(flatten)]
    pub params: AlgorithmParams,
    /// Keys matching neither a metric field nor an algorithm parameter.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// Action applied once when the generator starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeAction {
    pub action: String,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub duration_s: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub on_start: Vec<RuntimeAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_params_are_flattened() {
        let metric: MetricConfig = toml::from_str(
            r#"
            name = "http_requests_total"
            type = "counter"
            profile = "web"
            algorithm = "poisson"
            base_rate = 12
            diurnal_amp = 0.4
            clamp = [0, 1000]
            "#,
        )
        .unwrap();
        assert_eq!(metric.kind, MetricKind::Counter);
        assert_eq!(metric.params.base_rate, Some(12.0));
        assert_eq!(metric.params.diurnal_amp, Some(0.4));
        assert_eq!(metric.params.clamp, Some([0.0, 1000.0]));
        assert!(!metric.params.allow_nan);
        assert!(metric.unknown.is_empty());
    }

    #[test]
    fn test_mixture_components_parse() {
        let metric: MetricConfig = toml::from_str(
            r#"
            name = "latency_seconds"
            type = "histogram"
            algorithm = "mixture"
            buckets = [0.1, 0.5, 1.0]
            components = [
                { type = "lognormal", weight = 0.9, mu = -2.0, sigma = 0.3 },
                { type = "exponential", weight = 0.1, lam = 0.5 },
            ]
            "#,
        )
        .unwrap();
        let components = metric.params.components.unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[1].distribution, "exponential");
        assert_eq!(metric.buckets, Some(vec![0.1, 0.5, 1.0]));
        assert!(metric.profile.is_none());
    }

    #[test]
    fn test_misspelled_parameter_collected() {
        let metric: MetricConfig = toml::from_str(
            r#"
            name = "jobs_total"
            type = "counter"
            algorithm = "poisson"
            base_rat = 5
            "#,
        )
        .unwrap();
        assert!(metric.params.base_rate.is_none());
        let unknown: Vec<&str> = metric.unknown.keys().map(String::as_str).collect();
        assert_eq!(unknown, vec!["base_rat"]);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = toml::from_str::<MetricConfig>(
            r#"
            name = "x"
            type = "meter"
            "#,
        );
        assert!(result.is_err());
    }
}
