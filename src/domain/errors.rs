use thiserror::Error;

/// Errors detected while loading or wiring configuration.
///
/// Every variant is fatal at startup: the orchestrator never begins ticking
/// with a configuration that produced one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("At least one metric must be defined")]
    NoMetrics,

    #[error("Duplicate metric name: {name}")]
    DuplicateMetric { name: String },

    #[error("Invalid metric name '{name}': must match [a-zA-Z_:][a-zA-Z0-9_:]*")]
    InvalidMetricName { name: String },

    #[error("Invalid label name '{name}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidLabelName { name: String },

    #[error("Metric '{metric}' references undefined profile '{profile}'")]
    UnknownProfile { metric: String, profile: String },

    #[error("Label '{label}': range end {end} is before start {start}")]
    MalformedRange { label: String, start: i64, end: i64 },

    #[error("Label '{label}': unsupported format template '{template}'")]
    UnsupportedTemplate { label: String, template: String },

    #[error("Label '{label}': exactly one of `values` or `range` must be given")]
    AmbiguousLabelSpec { label: String },

    #[error("Profile '{profile}': series_cap must be at least 1")]
    InvalidSeriesCap { profile: String },

    #[error("Metric '{metric}': invalid parameter `{param}`: {reason}")]
    InvalidParameter {
        metric: String,
        param: &'static str,
        reason: String,
    },

    #[error("Metric '{metric}': unknown parameter `{key}`")]
    UnknownParameter { metric: String, key: String },

    #[error("Metric '{metric}': bucket boundaries must be finite and strictly increasing")]
    InvalidBuckets { metric: String },

    #[error("Metric '{metric}': bucket boundaries differ between exporters ({left} vs {right})")]
    BucketMismatch {
        metric: String,
        left: String,
        right: String,
    },

    #[error("Global tick interval must be greater than zero")]
    InvalidTickInterval,

    #[error("Unknown runtime action '{action}'")]
    UnknownRuntimeAction { action: String },

    #[error("Runtime action '{action}' targets unknown metric '{metric}'")]
    UnknownActionTarget { action: String, metric: String },

    #[error("Exporter registration failed: {0}")]
    Registration(#[from] ExportError),
}

/// Failures raised inside a single generator during one tick.
///
/// These are isolated per metric: the metric's points are omitted for the
/// tick and the orchestrator moves on.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Metric '{metric}': rate evaluated to a non-finite value ({rate})")]
    NonFiniteRate { metric: String, rate: f64 },

    #[error("Metric '{metric}': distribution rejected parameters: {reason}")]
    Distribution { metric: String, reason: String },

    #[error("Metric '{metric}': series state became non-finite")]
    NonFiniteState { metric: String },
}

/// Failures raised by a reconciler or the downstream exporter behind it.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Metric id {0} was never registered with this exporter")]
    UnknownMetric(usize),

    #[error("Metric '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("Metric '{name}': expected {expected} label values, got {actual}")]
    LabelMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Push transport failed: {0}")]
    Transport(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Exporter rejected write: {0}")]
    Rejected(String),
}
