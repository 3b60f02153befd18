use super::invalid_param;
use super::params::AlgorithmParams;
use crate::domain::errors::{ConfigError, GenerationError};
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand_distr::Poisson;
use std::f64::consts::TAU;

const SECONDS_PER_DAY: i64 = 86_400;

/// 24h sinusoidal scaling of a base rate:
/// `1 + amp * sin(2π * ((t mod 86400) / 86400 + phase))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diurnal {
    pub amplitude: f64,
    pub phase: f64,
}

impl Diurnal {
    pub fn factor(&self, timestamp: i64) -> f64 {
        let day_fraction = timestamp.rem_euclid(SECONDS_PER_DAY) as f64 / SECONDS_PER_DAY as f64;
        1.0 + self.amplitude * (TAU * (day_fraction + self.phase)).sin()
    }
}

/// How a counter's per-tick increment is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterAlgorithm {
    Constant { increment: f64 },
    Poisson { base_rate: f64, diurnal: Option<Diurnal> },
}

impl CounterAlgorithm {
    pub const DEFAULT: &'static str = "poisson";

    /// Unknown names resolve to `poisson`; the caller logs the fallback.
    pub fn from_params(
        metric: &str,
        algorithm: &str,
        params: &AlgorithmParams,
    ) -> Result<(Self, bool), ConfigError> {
        let base_rate = params.base_rate.unwrap_or(1.0);
        if !base_rate.is_finite() || base_rate < 0.0 {
            return Err(invalid_param(metric, "base_rate", "must be finite and >= 0"));
        }

        match algorithm {
            "constant" => Ok((CounterAlgorithm::Constant { increment: base_rate }, true)),
            other => {
                let diurnal = match params.diurnal_amp {
                    Some(amp) if amp != 0.0 => {
                        let phase = params.diurnal_phase.unwrap_or(0.0);
                        if !amp.is_finite() || !phase.is_finite() {
                            return Err(invalid_param(
                                metric,
                                "diurnal_amp",
                                "amplitude and phase must be finite",
                            ));
                        }
                        Some(Diurnal {
                            amplitude: amp,
                            phase,
                        })
                    }
                    _ => None,
                };
                Ok((
                    CounterAlgorithm::Poisson { base_rate, diurnal },
                    other == "poisson",
                ))
            }
        }
    }

    /// Resolves the increment source for one tick. The Poisson rate depends
    /// only on the timestamp, so it is shared by every series of the tick.
    pub fn prepare(&self, metric: &str, timestamp: i64) -> Result<Increment, GenerationError> {
        match self {
            CounterAlgorithm::Constant { increment } => Ok(Increment::Fixed(*increment)),
            CounterAlgorithm::Poisson { base_rate, diurnal } => {
                let rate = match diurnal {
                    Some(d) => base_rate * d.factor(timestamp),
                    None => *base_rate,
                };
                if !rate.is_finite() {
                    return Err(GenerationError::NonFiniteRate {
                        metric: metric.to_string(),
                        rate,
                    });
                }
                // A modulated rate can dip below zero; clamp to no traffic.
                if rate <= 0.0 {
                    return Ok(Increment::Fixed(0.0));
                }
                let poisson = Poisson::new(rate).map_err(|e| GenerationError::Distribution {
                    metric: metric.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Increment::Poisson(poisson))
            }
        }
    }
}

/// Per-tick increment source.
#[derive(Debug)]
pub enum Increment {
    Fixed(f64),
    Poisson(Poisson<f64>),
}

impl Increment {
    /// Never negative; NaN collapses to zero.
    pub fn draw(&self, rng: &mut StdRng) -> f64 {
        let raw = match self {
            Increment::Fixed(v) => *v,
            Increment::Poisson(dist) => dist.sample(rng),
        };
        raw.max(0.0)
    }
}
