//! Exporter sections: `[exporters.prometheus]` and `[exporters.push]`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;

/// Pull exporter: scrape endpoint over the prometheus registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrometheusExporterConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub prefix: String,
}

impl Default for PrometheusExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            prefix: "prom_".to_string(),
        }
    }
}

impl PrometheusExporterConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Push exporter: delta batches flushed to a collector (or stdout).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PushExporterConfig {
    pub enabled: bool,
    /// HTTP endpoint receiving JSON batches; `None` prints to stdout.
    pub endpoint: Option<String>,
    pub prefix: String,
    pub export_interval_s: u64,
    pub headers: BTreeMap<String, String>,
    /// Resource attributes attached to every batch.
    pub resource: BTreeMap<String, String>,
}

impl Default for PushExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            prefix: "otel_".to_string(),
            export_interval_s: 10,
            headers: BTreeMap::new(),
            resource: BTreeMap::new(),
        }
    }
}

impl PushExporterConfig {
    /// `PUSH_ENDPOINT` wins over the file; an empty value clears it.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = env::var("PUSH_ENDPOINT") {
            let endpoint = endpoint.trim();
            self.endpoint = if endpoint.is_empty() {
                None
            } else {
                Some(endpoint.to_string())
            };
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportersConfig {
    pub prometheus: PrometheusExporterConfig,
    #[serde(alias = "otel")]
    pub push: PushExporterConfig,
}
