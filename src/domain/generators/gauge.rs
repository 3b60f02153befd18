use super::invalid_param;
use super::params::AlgorithmParams;
use crate::domain::errors::ConfigError;
use rand::distr::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand_distr::Normal;
use std::f64::consts::TAU;

/// Absolute-value algorithms for gauges.
#[derive(Debug, Clone)]
pub enum GaugeAlgorithm {
    /// Gaussian step added to the previous value.
    RandomWalk { start: f64, step: Normal<f64> },
    Sine { min: f64, max: f64, period_s: u64 },
    Sawtooth { min: f64, max: f64, period_s: u64 },
    Bernoulli(Bernoulli),
    Constant(f64),
}

impl GaugeAlgorithm {
    pub const DEFAULT: &'static str = "random_walk";

    /// Unknown names resolve to `random_walk`; the caller logs the fallback.
    pub fn from_params(
        metric: &str,
        algorithm: &str,
        params: &AlgorithmParams,
    ) -> Result<(Self, bool), ConfigError> {
        let resolved = match algorithm {
            "sine" => Self::periodic(metric, params, true)?,
            "sawtooth" => Self::periodic(metric, params, false)?,
            "bernoulli" => {
                let p = params.p.unwrap_or(0.5);
                let dist = Bernoulli::new(p)
                    .map_err(|_| invalid_param(metric, "p", "must be within [0, 1]"))?;
                GaugeAlgorithm::Bernoulli(dist)
            }
            "constant" => {
                let value = params.start.unwrap_or(0.0);
                if !value.is_finite() {
                    return Err(invalid_param(metric, "start", "must be finite"));
                }
                GaugeAlgorithm::Constant(value)
            }
            _ => {
                let start = params.start.unwrap_or(0.0);
                let step = params.step.unwrap_or(0.1);
                if !start.is_finite() {
                    return Err(invalid_param(metric, "start", "must be finite"));
                }
                if !step.is_finite() || step < 0.0 {
                    return Err(invalid_param(metric, "step", "must be finite and >= 0"));
                }
                let step = Normal::new(0.0, step)
                    .map_err(|e| invalid_param(metric, "step", &e.to_string()))?;
                return Ok((
                    GaugeAlgorithm::RandomWalk { start, step },
                    algorithm == "random_walk",
                ));
            }
        };
        Ok((resolved, true))
    }

    fn periodic(metric: &str, params: &AlgorithmParams, sine: bool) -> Result<Self, ConfigError> {
        let min = params.min.unwrap_or(0.0);
        let max = params.max.unwrap_or(1.0);
        let period_s = params.period_s.unwrap_or(3600);
        if !min.is_finite() || !max.is_finite() || max < min {
            return Err(invalid_param(metric, "max", "min/max must be finite with min <= max"));
        }
        if period_s == 0 {
            return Err(invalid_param(metric, "period_s", "must be greater than zero"));
        }
        Ok(if sine {
            GaugeAlgorithm::Sine { min, max, period_s }
        } else {
            GaugeAlgorithm::Sawtooth { min, max, period_s }
        })
    }

    /// Next absolute value. `previous` is the series' last state, `None` on
    /// the first tick. Only the random walk and Bernoulli draw from `rng`.
    pub fn next(&self, rng: &mut StdRng, timestamp: i64, previous: Option<f64>) -> f64 {
        match self {
            GaugeAlgorithm::RandomWalk { start, step } => {
                previous.unwrap_or(*start) + step.sample(rng)
            }
            GaugeAlgorithm::Sine { min, max, period_s } => {
                let phase = period_phase(timestamp, *period_s);
                let baseline = (max + min) / 2.0;
                let amplitude = (max - min) / 2.0;
                baseline + amplitude * (TAU * phase).sin()
            }
            GaugeAlgorithm::Sawtooth { min, max, period_s } => {
                min + (max - min) * period_phase(timestamp, *period_s)
            }
            GaugeAlgorithm::Bernoulli(dist) => {
                if dist.sample(rng) {
                    1.0
                } else {
                    0.0
                }
            }
            GaugeAlgorithm::Constant(value) => *value,
        }
    }

    /// Whether the value feeds back into the next tick.
    pub fn is_stateful(&self) -> bool {
        matches!(self, GaugeAlgorithm::RandomWalk { .. })
    }
}

fn period_phase(timestamp: i64, period_s: u64) -> f64 {
    let period = period_s as i64;
    timestamp.rem_euclid(period) as f64 / period as f64
}
