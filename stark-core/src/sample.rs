//! Sample sets and the statistical distances between them.
//!
//! A [`SampleSet`] is a collection of states observed at the same step. The logic layers compare
//! sample sets by first observing every state through a [`DataStateExpression`] and then
//! computing a distance between the two resulting empirical distributions. Given the sorted
//! observations `a` of a set of size `n` and the sorted observations `b` of a set of size `k * n`,
//! the distance is:
//!
//! ```text
//! d(a, b) = 1 / (k * n) * Σ_i Σ_j m(a[i], b[i * k + j])
//! ```
//!
//! where `m` is a [`DistanceMetric`]. The directional metrics only account for the observations
//! of `b` above (`Leq`) or below (`Geq`) the corresponding observation of `a`:
//!
//! | Metric     | `m(x, y)`          |
//! |------------|--------------------|
//! | `Absolute` | `abs(y - x)`       |
//! | `Leq`      | `max(0, y - x)`    |
//! | `Geq`      | `max(0, x - y)`    |
//!
//! Confidence intervals for a distance are estimated with the bootstrap method: both observation
//! vectors are resampled with replacement, the distance is recomputed for every replication and
//! a normal approximation interval is computed from the replications, clamped to `[0, 1]`.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::trace;

use crate::combinator::Penalty;
use crate::functions::{DataStateExpression, DataStateFunction};
use crate::random::{Seed, SimRng};
use crate::system::{Observable, PerceivedState, SystemState};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("Cannot compute a distance from an empty sample set")]
    EmptySampleSet,

    #[error("Sample set of size {other} cannot be compared with a sample set of size {size}")]
    IncompatibleSizes { size: usize, other: usize },

    #[error("The bootstrap requires at least 2 replications, found {0}")]
    InvalidReplications(usize),

    #[error("Invalid z-score {0}")]
    InvalidZScore(f64),
}

/// Function comparing an observation of the first sample set with one of the second.
#[derive(Clone)]
pub enum DistanceMetric {
    Absolute,
    Leq,
    Geq,
    Custom(Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>),
}

impl DistanceMetric {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn eval(&self, v1: f64, v2: f64) -> f64 {
        match self {
            Self::Absolute => (v2 - v1).abs(),
            Self::Leq => (v2 - v1).max(0.0),
            Self::Geq => (v1 - v2).max(0.0),
            Self::Custom(f) => f(v1, v2),
        }
    }
}

impl Debug for DistanceMetric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => f.write_str("Absolute"),
            Self::Leq => f.write_str("Leq"),
            Self::Geq => f.write_str("Geq"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Parameters of bootstrap confidence interval estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapConfig {
    replications: usize,
    z_score: f64,
}

impl BootstrapConfig {
    pub const DEFAULT_REPLICATIONS: usize = 50;
    pub const DEFAULT_Z_SCORE: f64 = 1.96;

    pub fn new(replications: usize, z_score: f64) -> Result<Self, SampleError> {
        if replications < 2 {
            return Err(SampleError::InvalidReplications(replications));
        }

        if !z_score.is_finite() || z_score < 0.0 {
            return Err(SampleError::InvalidZScore(z_score));
        }

        Ok(Self { replications, z_score })
    }

    pub fn replications(&self) -> usize {
        self.replications
    }

    pub fn z_score(&self) -> f64 {
        self.z_score
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replications: Self::DEFAULT_REPLICATIONS,
            z_score: Self::DEFAULT_Z_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_unstable_by_key(|value| OrderedFloat(*value));
    values
}

fn check_sizes(size: usize, other: usize) -> Result<usize, SampleError> {
    if size == 0 {
        return Err(SampleError::EmptySampleSet);
    }

    if other % size != 0 {
        return Err(SampleError::IncompatibleSizes { size, other });
    }

    Ok(other / size)
}

fn sorted_distance(a: &[f64], b: &[f64], metric: &DistanceMetric) -> Result<f64, SampleError> {
    let k = check_sizes(a.len(), b.len())?;
    let total: f64 = a
        .iter()
        .zip(b.chunks(k.max(1)))
        .map(|(x, ys)| ys.iter().map(|y| metric.eval(*x, *y)).sum::<f64>())
        .sum();

    Ok(total / b.len() as f64)
}

fn resample(rng: &mut SimRng, values: &[f64]) -> Vec<f64> {
    let resampled = (0..values.len()).map(|_| values[rng.gen_range(0..values.len())]).collect();
    sorted(resampled)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet<T> {
    states: Vec<T>,
}

impl<T> SampleSet<T> {
    pub fn new(states: Vec<T>) -> Self {
        Self { states }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.states.iter()
    }

    pub fn states(&self) -> &[T] {
        &self.states
    }

    pub fn into_inner(self) -> Vec<T> {
        self.states
    }
}

impl<T> Default for SampleSet<T> {
    fn default() -> Self {
        Self { states: Vec::new() }
    }
}

impl<T> FromIterator<T> for SampleSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a SampleSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}

impl<T> SampleSet<T>
where
    T: Clone,
{
    /// Repeat every element `copies` times, keeping the copies of an element next to each other.
    pub fn replica(&self, copies: usize) -> Self {
        self.states
            .iter()
            .flat_map(|state| std::iter::repeat(state).take(copies).cloned())
            .collect()
    }
}

impl<T> SampleSet<T>
where
    T: Observable,
{
    /// Sample `size` independent states from `generator`.
    pub fn generate<F>(rng: &mut SimRng, generator: F, size: usize) -> Self
    where
        F: Fn(&mut SimRng) -> T + Send + Sync,
    {
        let seed = Seed::draw(rng);
        let states = (0..size)
            .into_par_iter()
            .map(|index| generator(&mut seed.fork(index as u64).rng()))
            .collect();

        Self::new(states)
    }

    /// Map every element with its own generator derived from a single draw of `rng`.
    pub fn map<U, F>(&self, rng: &mut SimRng, f: F) -> SampleSet<U>
    where
        U: Send,
        F: Fn(&mut SimRng, &T) -> U + Send + Sync,
    {
        let seed = Seed::draw(rng);
        let states = self
            .states
            .par_iter()
            .enumerate()
            .map(|(index, state)| f(&mut seed.fork(index as u64).rng(), state))
            .collect();

        SampleSet::new(states)
    }

    /// Apply a stochastic transformation to the data state of every element.
    pub fn apply_distribution(&self, rng: &mut SimRng, f: &DataStateFunction) -> Self {
        self.map(rng, |rng, state| state.with_data_state(f.apply(rng, state.data_state())))
    }

    pub fn values(&self, f: &DataStateExpression) -> Vec<f64> {
        self.states.iter().map(|state| f.eval(state.data_state())).collect()
    }

    /// Observations of every element through `f`, in increasing order.
    pub fn sorted_values(&self, f: &DataStateExpression) -> Vec<f64> {
        sorted(self.values(f))
    }

    /// Sorted scores of the penalty function selected for `step`.
    pub fn penalty_values(&self, penalty: &Penalty, step: usize) -> Vec<f64> {
        self.sorted_values(&penalty.effect_at(step))
    }

    /// Average observation, NaN for an empty set.
    pub fn mean(&self, f: &DataStateExpression) -> f64 {
        self.values(f).iter().sum::<f64>() / self.len() as f64
    }

    /// Nearest-rank quantile of the observations, NaN for an empty set or `q` outside `[0, 1]`.
    pub fn quantile(&self, f: &DataStateExpression, q: f64) -> f64 {
        if self.is_empty() || !(0.0..=1.0).contains(&q) {
            return f64::NAN;
        }

        let values = self.sorted_values(f);
        let rank = (q * values.len() as f64).ceil() as usize;

        values[rank.saturating_sub(1)]
    }

    pub fn distance<U>(
        &self,
        f: &DataStateExpression,
        metric: &DistanceMetric,
        other: &SampleSet<U>,
    ) -> Result<f64, SampleError>
    where
        U: Observable,
    {
        check_sizes(self.len(), other.len())?;
        sorted_distance(&self.sorted_values(f), &other.sorted_values(f), metric)
    }

    pub fn distance_leq<U>(
        &self,
        f: &DataStateExpression,
        other: &SampleSet<U>,
    ) -> Result<f64, SampleError>
    where
        U: Observable,
    {
        self.distance(f, &DistanceMetric::Leq, other)
    }

    pub fn distance_geq<U>(
        &self,
        f: &DataStateExpression,
        other: &SampleSet<U>,
    ) -> Result<f64, SampleError>
    where
        U: Observable,
    {
        self.distance(f, &DistanceMetric::Geq, other)
    }

    /// [`SampleSet::distance_leq`] using the scoring function of `penalty` at `step`.
    pub fn distance_leq_penalty<U>(
        &self,
        penalty: &Penalty,
        other: &SampleSet<U>,
        step: usize,
    ) -> Result<f64, SampleError>
    where
        U: Observable,
    {
        self.distance_leq(&penalty.effect_at(step), other)
    }

    /// [`SampleSet::distance_geq`] using the scoring function of `penalty` at `step`.
    pub fn distance_geq_penalty<U>(
        &self,
        penalty: &Penalty,
        other: &SampleSet<U>,
        step: usize,
    ) -> Result<f64, SampleError>
    where
        U: Observable,
    {
        self.distance_geq(&penalty.effect_at(step), other)
    }

    pub fn bootstrap_distance<U>(
        &self,
        rng: &mut SimRng,
        f: &DataStateExpression,
        metric: &DistanceMetric,
        other: &SampleSet<U>,
        config: &BootstrapConfig,
    ) -> Result<ConfidenceInterval, SampleError>
    where
        U: Observable,
    {
        check_sizes(self.len(), other.len())?;

        let a = self.values(f);
        let b = other.values(f);
        let mut estimates = Vec::with_capacity(config.replications);

        for _ in 0..config.replications {
            let ra = resample(rng, &a);
            let rb = resample(rng, &b);
            estimates.push(sorted_distance(&ra, &rb, metric)?);
        }

        let m = estimates.len() as f64;
        let mean = estimates.iter().sum::<f64>() / m;
        let variance = estimates.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / (m - 1.0);
        let error = config.z_score * variance.sqrt();

        trace!(mean, error, "bootstrap distance estimate");

        Ok(ConfidenceInterval {
            lower: (mean - error).max(0.0),
            upper: (mean + error).min(1.0),
        })
    }
}

impl SampleSet<SystemState> {
    /// Perform one step of every system in the set.
    pub fn sample_next(&self, rng: &mut SimRng) -> Self {
        self.map(rng, |rng, state| state.sample_next(rng))
    }

    /// Data-only view of the set.
    pub fn perceive(&self) -> SampleSet<PerceivedState> {
        self.states.iter().map(SystemState::perceive).collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use crate::combinator::Penalty;
    use crate::ds::{DataState, DataStateUpdate};
    use crate::functions::{DataStateExpression, DataStateFunction};
    use crate::random::Seed;
    use crate::system::{Observable, PerceivedState};
    use super::{BootstrapConfig, DistanceMetric, SampleError, SampleSet};

    const EPSILON: f64 = 1e-12;

    fn set(values: &[f64]) -> SampleSet<PerceivedState> {
        values.iter().map(|v| PerceivedState::from(DataState::new(vec![*v]))).collect()
    }

    #[test]
    fn replica_keeps_copies_together() {
        let replicated = set(&[1.0, 2.0]).replica(3);
        assert_eq!(replicated, set(&[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]));
    }

    #[test]
    fn statistics() {
        let x = DataStateExpression::variable(0);
        let samples = set(&[4.0, 1.0, 3.0, 2.0]);

        assert_relative_eq!(samples.mean(&x), 2.5, epsilon = EPSILON);
        assert_eq!(samples.sorted_values(&x), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(samples.quantile(&x, 0.5), 2.0);
        assert_eq!(samples.quantile(&x, 1.0), 4.0);
        assert_eq!(samples.quantile(&x, 0.0), 1.0);
        assert!(samples.quantile(&x, 1.5).is_nan());
        assert!(set(&[]).mean(&x).is_nan());
    }

    #[test]
    fn directional_distances() -> Result<(), SampleError> {
        let x = DataStateExpression::variable(0);
        let a = set(&[0.0, 0.5]);
        let b = set(&[0.2, 0.4, 0.1, 0.8]);

        // sorted b = [0.1, 0.2, 0.4, 0.8], pairs (0.0: 0.1, 0.2) and (0.5: 0.4, 0.8)
        assert_relative_eq!(
            a.distance_leq(&x, &b)?,
            (0.1 + 0.2 + 0.0 + 0.3) / 4.0,
            epsilon = EPSILON
        );
        assert_relative_eq!(a.distance_geq(&x, &b)?, 0.1 / 4.0, epsilon = EPSILON);
        assert_relative_eq!(
            a.distance(&x, &DistanceMetric::Absolute, &b)?,
            (0.1 + 0.2 + 0.1 + 0.3) / 4.0,
            epsilon = EPSILON
        );
        assert_relative_eq!(a.distance_leq(&x, &a)?, 0.0, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn incompatible_sizes() {
        let x = DataStateExpression::variable(0);
        let result = set(&[0.0, 1.0]).distance_leq(&x, &set(&[0.0, 1.0, 2.0]));

        assert_eq!(result, Err(SampleError::IncompatibleSizes { size: 2, other: 3 }));
        assert_eq!(set(&[]).distance_leq(&x, &set(&[1.0])), Err(SampleError::EmptySampleSet));
    }

    #[test]
    fn penalty_distance_uses_step() -> Result<(), SampleError> {
        let penalty = Penalty::atomic(1, DataStateExpression::variable(0));
        let a = set(&[0.0]);
        let b = set(&[0.5]);

        assert_eq!(a.distance_leq_penalty(&penalty, &b, 0)?, 0.0);
        assert_relative_eq!(a.distance_leq_penalty(&penalty, &b, 1)?, 0.5, epsilon = EPSILON);
        assert_relative_eq!(b.distance_geq_penalty(&penalty, &a, 1)?, 0.5, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn bootstrap_interval() -> Result<(), SampleError> {
        let x = DataStateExpression::variable(0);
        let a: SampleSet<PerceivedState> =
            set(&(0..40).map(|i| i as f64 / 100.0).collect::<Vec<_>>());
        let b = set(&(0..40).map(|i| 0.2 + i as f64 / 100.0).collect::<Vec<_>>());
        let mut rng = Seed::new(11).rng();

        let config = BootstrapConfig::default();
        let ci = a.bootstrap_distance(&mut rng, &x, &DistanceMetric::Leq, &b, &config)?;

        assert!(ci.lower >= 0.0);
        assert!(ci.lower <= ci.upper);
        assert!(ci.upper <= 1.0);
        assert!(ci.lower < 0.25 && ci.upper > 0.15);
        Ok(())
    }

    proptest! {
        #[test]
        fn bootstrap_interval_is_ordered(
            pairs in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 1..24),
            seed in any::<u64>(),
        ) {
            let x = DataStateExpression::variable(0);
            let (a, b): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            let config = BootstrapConfig::new(8, 1.96)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let mut rng = Seed::new(seed).rng();

            let ci = set(&a)
                .bootstrap_distance(&mut rng, &x, &DistanceMetric::Leq, &set(&b), &config)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert!(0.0 <= ci.lower);
            prop_assert!(ci.lower <= ci.upper);
            prop_assert!(ci.upper <= 1.0);
        }
    }

    #[test]
    fn bootstrap_config() {
        assert!(BootstrapConfig::new(1, 1.96).is_err());
        assert!(BootstrapConfig::new(10, -1.0).is_err());
        assert_eq!(BootstrapConfig::default().replications(), 50);
    }

    #[test]
    fn maps_are_reproducible() {
        let noise = DataStateFunction::new(|rng, s| {
            use rand::Rng;
            s.apply(&[DataStateUpdate::new(0, s[0] + rng.gen::<f64>())])
        });
        let samples = set(&[0.0; 16]);

        let first = samples.apply_distribution(&mut Seed::new(5).rng(), &noise);
        let second = samples.apply_distribution(&mut Seed::new(5).rng(), &noise);

        assert_eq!(first, second);
        assert!(first.iter().any(|s| s.data_state()[0] != first.states()[0].data_state()[0]));
    }
}
