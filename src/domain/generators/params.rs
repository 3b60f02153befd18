use serde::{Deserialize, Serialize};

/// Raw algorithm parameters as they appear on a metric definition. Which
/// fields matter depends on the selected algorithm; unset fields fall back to
/// per-algorithm defaults when the generator is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    // Counter
    #[serde(default)]
    pub base_rate: Option<f64>,
    #[serde(default)]
    pub diurnal_amp: Option<f64>,
    #[serde(default)]
    pub diurnal_phase: Option<f64>,

    // Random walk / constant
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,

    // Periodic
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub period_s: Option<u64>,

    // Bernoulli
    #[serde(default)]
    pub p: Option<f64>,

    // Distributions
    #[serde(default)]
    pub mu: Option<f64>,
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub lam: Option<f64>,
    #[serde(default)]
    pub components: Option<Vec<MixtureComponent>>,

    // Post-processing, shared by every kind
    #[serde(default)]
    pub clamp: Option<[f64; 2]>,
    #[serde(default)]
    pub allow_nan: bool,
}

/// One weighted member of a mixture distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureComponent {
    #[serde(rename = "type")]
    pub distribution: String,
    pub weight: f64,
    #[serde(default)]
    pub mu: Option<f64>,
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub lam: Option<f64>,
}
