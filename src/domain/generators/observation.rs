use super::invalid_param;
use super::params::{AlgorithmParams, MixtureComponent};
use crate::domain::errors::ConfigError;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand_distr::{Exp, LogNormal};

/// A single-draw distribution used by Histogram and Summary generators.
#[derive(Debug, Clone)]
pub enum Sampler {
    LogNormal(LogNormal<f64>),
    Exponential(Exp<f64>),
}

impl Sampler {
    fn lognormal(metric: &str, mu: Option<f64>, sigma: Option<f64>) -> Result<Self, ConfigError> {
        let mu = mu.unwrap_or(0.0);
        let sigma = sigma.unwrap_or(1.0);
        if !mu.is_finite() {
            return Err(invalid_param(metric, "mu", "must be finite"));
        }
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(invalid_param(metric, "sigma", "must be finite and >= 0"));
        }
        LogNormal::new(mu, sigma)
            .map(Sampler::LogNormal)
            .map_err(|e| invalid_param(metric, "sigma", &e.to_string()))
    }

    fn exponential(metric: &str, lam: Option<f64>) -> Result<Self, ConfigError> {
        let lam = lam.unwrap_or(1.0);
        if !lam.is_finite() || lam <= 0.0 {
            return Err(invalid_param(metric, "lam", "must be finite and > 0"));
        }
        Exp::new(lam)
            .map(Sampler::Exponential)
            .map_err(|e| invalid_param(metric, "lam", &e.to_string()))
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            Sampler::LogNormal(dist) => dist.sample(rng),
            Sampler::Exponential(dist) => dist.sample(rng),
        }
    }
}

/// Weighted mixture. Weights are normalized at build time; one draw picks
/// the component, a second draw samples it.
#[derive(Debug, Clone)]
pub struct Mixture {
    weights: Vec<f64>,
    chooser: WeightedIndex<f64>,
    components: Vec<Sampler>,
}

impl Mixture {
    fn build(metric: &str, components: &[MixtureComponent]) -> Result<Self, ConfigError> {
        let mut samplers = Vec::with_capacity(components.len());
        for component in components {
            let sampler = match component.distribution.as_str() {
                "lognormal" => Sampler::lognormal(metric, component.mu, component.sigma)?,
                "exponential" => Sampler::exponential(metric, component.lam)?,
                other => {
                    return Err(invalid_param(
                        metric,
                        "components",
                        &format!("unsupported component type '{}'", other),
                    ));
                }
            };
            samplers.push(sampler);
        }

        if components.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0) {
            return Err(invalid_param(metric, "components", "weights must be finite and >= 0"));
        }
        let total: f64 = components.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return Err(invalid_param(metric, "components", "weights must not all be zero"));
        }
        let weights: Vec<f64> = components.iter().map(|c| c.weight / total).collect();
        let chooser = WeightedIndex::new(&weights)
            .map_err(|e| invalid_param(metric, "components", &e.to_string()))?;

        Ok(Self {
            weights,
            chooser,
            components: samplers,
        })
    }

    pub fn normalized_weights(&self) -> &[f64] {
        &self.weights
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        let idx = self.chooser.sample(rng);
        self.components[idx].sample(rng)
    }
}

/// Raw-observation algorithms for Histogram and Summary.
#[derive(Debug, Clone)]
pub enum ObservationAlgorithm {
    Single(Sampler),
    Mixture(Mixture),
}

impl ObservationAlgorithm {
    pub const DEFAULT: &'static str = "lognormal";

    /// Unknown names, and a mixture without components, resolve to
    /// `lognormal` over the metric-level `mu`/`sigma`.
    pub fn from_params(
        metric: &str,
        algorithm: &str,
        params: &AlgorithmParams,
    ) -> Result<(Self, bool), ConfigError> {
        match algorithm {
            "exponential" => Ok((
                ObservationAlgorithm::Single(Sampler::exponential(metric, params.lam)?),
                true,
            )),
            "mixture" => match params.components.as_deref() {
                Some(components) if !components.is_empty() => Ok((
                    ObservationAlgorithm::Mixture(Mixture::build(metric, components)?),
                    true,
                )),
                _ => Ok((Self::default_lognormal(metric, params)?, false)),
            },
            other => Ok((Self::default_lognormal(metric, params)?, other == "lognormal")),
        }
    }

    fn default_lognormal(metric: &str, params: &AlgorithmParams) -> Result<Self, ConfigError> {
        Sampler::lognormal(metric, params.mu, params.sigma).map(ObservationAlgorithm::Single)
    }

    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            ObservationAlgorithm::Single(sampler) => sampler.sample(rng),
            ObservationAlgorithm::Mixture(mixture) => mixture.sample(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use statrs::statistics::Statistics;

    fn component(kind: &str, weight: f64) -> MixtureComponent {
        MixtureComponent {
            distribution: kind.to_string(),
            weight,
            mu: Some(0.0),
            sigma: Some(0.5),
            lam: Some(2.0),
        }
    }

    #[test]
    fn test_mixture_weights_are_normalized() {
        let params = AlgorithmParams {
            components: Some(vec![component("lognormal", 3.0), component("exponential", 1.0)]),
            ..AlgorithmParams::default()
        };
        let (algo, recognized) =
            ObservationAlgorithm::from_params("m", "mixture", &params).unwrap();
        assert!(recognized);
        match algo {
            ObservationAlgorithm::Mixture(mix) => {
                assert_eq!(mix.normalized_weights(), &[0.75, 0.25]);
            }
            other => panic!("expected mixture, got {:?}", other),
        }
    }

    #[test]
    fn test_mixture_rejects_unknown_component() {
        let params = AlgorithmParams {
            components: Some(vec![component("pareto", 1.0)]),
            ..AlgorithmParams::default()
        };
        assert!(ObservationAlgorithm::from_params("m", "mixture", &params).is_err());
    }

    #[test]
    fn test_mixture_rejects_zero_weights() {
        let params = AlgorithmParams {
            components: Some(vec![component("lognormal", 0.0)]),
            ..AlgorithmParams::default()
        };
        assert!(ObservationAlgorithm::from_params("m", "mixture", &params).is_err());
    }

    #[test]
    fn test_empty_mixture_falls_back_to_lognormal() {
        let (algo, recognized) =
            ObservationAlgorithm::from_params("m", "mixture", &AlgorithmParams::default()).unwrap();
        assert!(!recognized);
        assert!(matches!(algo, ObservationAlgorithm::Single(Sampler::LogNormal(_))));
    }

    #[test]
    fn test_exponential_mean_tracks_lambda() {
        let params = AlgorithmParams {
            lam: Some(4.0),
            ..AlgorithmParams::default()
        };
        let (algo, _) = ObservationAlgorithm::from_params("m", "exponential", &params).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..20_000).map(|_| algo.sample(&mut rng)).collect();
        let mean = samples.iter().mean();
        assert!((mean - 0.25).abs() < 0.02, "mean was {}", mean);
        assert!(samples.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_exponential_requires_positive_lambda() {
        let params = AlgorithmParams {
            lam: Some(0.0),
            ..AlgorithmParams::default()
        };
        assert!(ObservationAlgorithm::from_params("m", "exponential", &params).is_err());
    }
}
