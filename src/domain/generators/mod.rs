//! Per-metric value generation.
//!
//! One `ValueGenerator` per configured metric. It owns a seeded random
//! stream and one state slot per series of its label space; `tick` draws in
//! a fixed order (series by series, in label-space order) so a given seed
//! and timestamp sequence always reproduces the same values.

pub mod counter;
pub mod gauge;
pub mod observation;
pub mod params;

pub use counter::{CounterAlgorithm, Diurnal};
pub use gauge::GaugeAlgorithm;
pub use observation::ObservationAlgorithm;
pub use params::{AlgorithmParams, MixtureComponent};

use crate::domain::cardinality::LabelSpace;
use crate::domain::errors::{ConfigError, GenerationError};
use crate::domain::labels::LabelSet;
use crate::domain::types::{MetricId, MetricKind, SeriesId, SeriesPoint};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn invalid_param(metric: &str, param: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        metric: metric.to_string(),
        param,
        reason: reason.to_string(),
    }
}

/// Algorithm resolved once at build time, one variant per kind family.
#[derive(Debug, Clone)]
enum Strategy {
    Counter(CounterAlgorithm),
    Gauge(GaugeAlgorithm),
    Observation(ObservationAlgorithm),
}

/// Shared post-processing: optional clamp and the undefined-value policy.
#[derive(Debug, Clone, Copy)]
struct PostProcess {
    clamp: Option<(f64, f64)>,
    allow_undefined: bool,
}

impl PostProcess {
    fn apply(&self, value: f64) -> Option<f64> {
        if !value.is_finite() && !self.allow_undefined {
            return None;
        }
        Some(match self.clamp {
            Some((min, max)) if !value.is_nan() => value.clamp(min, max),
            _ => value,
        })
    }
}

/// Everything needed to build a generator for one metric.
#[derive(Debug, Clone)]
pub struct GeneratorSpec<'a> {
    pub metric: MetricId,
    pub name: &'a str,
    pub kind: MetricKind,
    /// `None` selects the per-kind default without a warning.
    pub algorithm: Option<&'a str>,
    pub params: &'a AlgorithmParams,
    pub seed: u64,
}

#[derive(Debug)]
pub struct ValueGenerator {
    metric: MetricId,
    name: Arc<str>,
    kind: MetricKind,
    space: Arc<LabelSpace>,
    rng: StdRng,
    strategy: Strategy,
    post: PostProcess,
    /// Indexed by `SeriesId`; `None` until the series' first tick.
    state: Vec<Option<f64>>,
}

impl ValueGenerator {
    pub fn build(spec: GeneratorSpec<'_>, space: Arc<LabelSpace>) -> Result<Self, ConfigError> {
        let name = spec.name;
        let params = spec.params;

        let (strategy, requested, default, recognized) = match spec.kind {
            MetricKind::Counter => {
                let requested = spec.algorithm.unwrap_or(CounterAlgorithm::DEFAULT);
                let (algo, ok) = CounterAlgorithm::from_params(name, requested, params)?;
                (Strategy::Counter(algo), requested, CounterAlgorithm::DEFAULT, ok)
            }
            MetricKind::Gauge => {
                let requested = spec.algorithm.unwrap_or(GaugeAlgorithm::DEFAULT);
                let (algo, ok) = GaugeAlgorithm::from_params(name, requested, params)?;
                (Strategy::Gauge(algo), requested, GaugeAlgorithm::DEFAULT, ok)
            }
            MetricKind::Histogram | MetricKind::Summary => {
                let requested = spec.algorithm.unwrap_or(ObservationAlgorithm::DEFAULT);
                let (algo, ok) = ObservationAlgorithm::from_params(name, requested, params)?;
                (
                    Strategy::Observation(algo),
                    requested,
                    ObservationAlgorithm::DEFAULT,
                    ok,
                )
            }
        };

        if !recognized {
            warn!(
                "Generator: unknown or incomplete algorithm '{}' for {} {}, falling back to '{}'",
                requested, spec.kind, name, default
            );
        }

        let clamp = match params.clamp {
            Some([min, max]) => {
                if min.is_nan() || max.is_nan() || min > max {
                    return Err(invalid_param(name, "clamp", "expected [min, max] with min <= max"));
                }
                Some((min, max))
            }
            None => None,
        };

        Ok(Self {
            metric: spec.metric,
            name: Arc::from(name),
            kind: spec.kind,
            state: vec![None; space.len()],
            space,
            rng: StdRng::seed_from_u64(spec.seed),
            strategy,
            post: PostProcess {
                clamp,
                allow_undefined: params.allow_nan,
            },
        })
    }

    pub fn metric(&self) -> MetricId {
        self.metric
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn series_count(&self) -> usize {
        self.space.len()
    }

    pub fn label_space(&self) -> &Arc<LabelSpace> {
        &self.space
    }

    /// One point per series in label-space order, minus any value dropped by
    /// the undefined-value policy. Only this generator's state is touched.
    pub fn tick(&mut self, timestamp: i64) -> Result<Vec<SeriesPoint>, GenerationError> {
        let mut points = Vec::with_capacity(self.space.len());

        match &self.strategy {
            Strategy::Counter(algo) => {
                let increment = algo.prepare(&self.name, timestamp)?;
                for (idx, labels) in self.space.combinations().iter().enumerate() {
                    let total = self.state[idx].unwrap_or(0.0) + increment.draw(&mut self.rng);
                    if !total.is_finite() {
                        return Err(GenerationError::NonFiniteState {
                            metric: self.name.to_string(),
                        });
                    }
                    self.state[idx] = Some(total);
                    if let Some(value) = self.post.apply(total) {
                        points.push(self.point(idx, labels, value));
                    }
                }
            }
            Strategy::Gauge(algo) => {
                let stateful = algo.is_stateful();
                for (idx, labels) in self.space.combinations().iter().enumerate() {
                    let raw = algo.next(&mut self.rng, timestamp, self.state[idx]);
                    let emitted = self.post.apply(raw);
                    if stateful {
                        match emitted {
                            Some(v) if v.is_finite() => self.state[idx] = Some(v),
                            // A walk that left the finite range restarts from `start`.
                            _ => self.state[idx] = None,
                        }
                    }
                    if let Some(value) = emitted {
                        points.push(self.point(idx, labels, value));
                    }
                }
            }
            Strategy::Observation(algo) => {
                for (idx, labels) in self.space.combinations().iter().enumerate() {
                    let raw = algo.sample(&mut self.rng);
                    let defined = raw.is_finite() && raw >= 0.0;
                    if !defined {
                        if self.post.allow_undefined {
                            points.push(self.point(idx, labels, raw));
                        }
                        continue;
                    }
                    if let Some(value) = self.post.apply(raw) {
                        points.push(self.point(idx, labels, value));
                    }
                }
            }
        }

        Ok(points)
    }

    fn point(&self, idx: usize, labels: &Arc<LabelSet>, value: f64) -> SeriesPoint {
        SeriesPoint::new(
            self.metric,
            SeriesId(idx),
            Arc::clone(&self.name),
            Arc::clone(labels),
            value,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cardinality::{
        CardinalityProfile, LabelDimensions, LabelSpaceBuilder, LabelSpec,
    };

    fn space() -> Arc<LabelSpace> {
        let profile = CardinalityProfile {
            labels: LabelDimensions::new()
                .with("region", LabelSpec::values(["us", "eu"]))
                .with("az", LabelSpec::values(["a", "b"])),
            ..CardinalityProfile::default()
        };
        Arc::new(LabelSpaceBuilder::new(&profile).build().unwrap())
    }

    fn generator(
        kind: MetricKind,
        algorithm: Option<&str>,
        params: &AlgorithmParams,
        seed: u64,
    ) -> ValueGenerator {
        ValueGenerator::build(
            GeneratorSpec {
                metric: MetricId(0),
                name: "test_metric",
                kind,
                algorithm,
                params,
                seed,
            },
            space(),
        )
        .unwrap()
    }

    fn values(points: &[SeriesPoint]) -> Vec<f64> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let params = AlgorithmParams {
            base_rate: Some(12.0),
            diurnal_amp: Some(0.3),
            ..AlgorithmParams::default()
        };
        for kind in [MetricKind::Counter, MetricKind::Gauge, MetricKind::Histogram] {
            let mut a = generator(kind, None, &params, 42);
            let mut b = generator(kind, None, &params, 42);
            for ts in [1_700_000_000, 1_700_000_001, 1_700_000_002, 1_700_000_010] {
                let left = values(&a.tick(ts).unwrap());
                let right = values(&b.tick(ts).unwrap());
                assert_eq!(left, right, "kind {} diverged at {}", kind, ts);
            }
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let params = AlgorithmParams::default();
        let mut a = generator(MetricKind::Histogram, None, &params, 1);
        let mut b = generator(MetricKind::Histogram, None, &params, 2);
        assert_ne!(values(&a.tick(0).unwrap()), values(&b.tick(0).unwrap()));
    }

    #[test]
    fn test_points_follow_label_space_order() {
        let mut g = generator(MetricKind::Gauge, Some("constant"), &AlgorithmParams::default(), 0);
        let points = g.tick(0).unwrap();
        assert_eq!(points.len(), 4);
        for (idx, point) in points.iter().enumerate() {
            assert_eq!(point.series, SeriesId(idx));
            assert_eq!(&point.labels, &g.label_space().combinations()[idx]);
        }
    }

    #[test]
    fn test_counter_is_cumulative_and_monotonic() {
        let params = AlgorithmParams {
            base_rate: Some(2.0),
            ..AlgorithmParams::default()
        };
        let mut constant = generator(MetricKind::Counter, Some("constant"), &params, 0);
        assert_eq!(values(&constant.tick(0).unwrap()), vec![2.0; 4]);
        assert_eq!(values(&constant.tick(1).unwrap()), vec![4.0; 4]);
        assert_eq!(values(&constant.tick(2).unwrap()), vec![6.0; 4]);

        let mut poisson = generator(MetricKind::Counter, Some("poisson"), &params, 5);
        let mut previous = vec![0.0; 4];
        for ts in 0..50 {
            let current = values(&poisson.tick(ts).unwrap());
            for (now, before) in current.iter().zip(&previous) {
                assert!(now >= before);
            }
            previous = current;
        }
    }

    #[test]
    fn test_clamp_bounds_emitted_values() {
        let params = AlgorithmParams {
            start: Some(5.0),
            clamp: Some([0.0, 2.0]),
            ..AlgorithmParams::default()
        };
        let mut g = generator(MetricKind::Gauge, Some("constant"), &params, 0);
        assert_eq!(values(&g.tick(0).unwrap()), vec![2.0; 4]);
    }

    #[test]
    fn test_random_walk_state_pinned_to_clamp() {
        let params = AlgorithmParams {
            start: Some(10.0),
            step: Some(0.0),
            clamp: Some([0.0, 3.0]),
            ..AlgorithmParams::default()
        };
        let mut g = generator(MetricKind::Gauge, Some("random_walk"), &params, 0);
        assert_eq!(values(&g.tick(0).unwrap()), vec![3.0; 4]);
        assert_eq!(g.state, vec![Some(3.0); 4]);
    }

    #[test]
    fn test_invalid_clamp_rejected() {
        let params = AlgorithmParams {
            clamp: Some([5.0, 1.0]),
            ..AlgorithmParams::default()
        };
        let result = ValueGenerator::build(
            GeneratorSpec {
                metric: MetricId(0),
                name: "m",
                kind: MetricKind::Gauge,
                algorithm: None,
                params: &params,
                seed: 0,
            },
            space(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidParameter { param: "clamp", .. })));
    }

    #[test]
    fn test_observations_are_non_negative() {
        let params = AlgorithmParams {
            mu: Some(-2.0),
            sigma: Some(0.5),
            ..AlgorithmParams::default()
        };
        let mut g = generator(MetricKind::Summary, Some("lognormal"), &params, 3);
        for ts in 0..20 {
            let points = g.tick(ts).unwrap();
            assert_eq!(points.len(), 4);
            assert!(points.iter().all(|p| p.value >= 0.0));
        }
    }

    #[test]
    fn test_post_process_drops_undefined_unless_allowed() {
        let strict = PostProcess {
            clamp: Some((0.0, 1.0)),
            allow_undefined: false,
        };
        assert_eq!(strict.apply(f64::NAN), None);
        assert_eq!(strict.apply(f64::INFINITY), None);
        assert_eq!(strict.apply(4.0), Some(1.0));

        let lenient = PostProcess {
            clamp: Some((0.0, 1.0)),
            allow_undefined: true,
        };
        assert!(lenient.apply(f64::NAN).is_some_and(f64::is_nan));
    }
}
