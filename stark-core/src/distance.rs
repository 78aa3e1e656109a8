//! Distance expressions between two evolution sequences.
//!
//! A [`DistanceExpression`] quantifies how far the sample sets of a second evolution sequence
//! drifted from the ones of a first sequence. Smaller values mean closer behaviors, so the temporal
//! combinators read existential quantification as a minimum and universal quantification as a
//! maximum.
//!
//! | Expression                    | Value at step `s`                                       |
//! |-------------------------------|---------------------------------------------------------|
//! | `Atomic(f, m)`                | distance of `a[s]` and `b[s]` observed through `f`      |
//! | `ConvexCombination(w, e)`     | `Σ w_i * e_i(s)`                                        |
//! | `Max(e1, e2)` / `Min(e1, e2)` | `max(e1(s), e2(s))` / `min(e1(s), e2(s))`               |
//! | `MaxInterval(e, [a, b))`      | `max e(t)` for `t` in `[s + a, s + b)`                  |
//! | `MinInterval(e, [a, b))`      | `min e(t)` for `t` in `[s + a, s + b)`                  |
//! | `Until(l, [a, b), r)`         | `min` over `t` in `[s + a, s + b)` of `max(r(t), L(t))` |
//! | `Threshold(e, ~, k)`          | `0` if `e(s) ~ k`, `1` otherwise                        |
//!
//! In `Until`, `L(t)` is the maximum of `l(j)` for `j` in `[s + a, t)`.
//!
//! Every expression also computes an [`Estimate`] containing the point value together with a
//! bootstrap confidence interval. Composite expressions combine the bounds of their operands
//! component by component. For `Max` and `Min` this is a conservative approximation rather than a
//! statistically exact interval for the maximum or minimum of two random variables.
//!
//! ```rust
//! use stark::distance::DistanceExpression;
//! use stark::functions::DataStateExpression;
//!
//! let position = DistanceExpression::atomic_leq(DataStateExpression::variable(0));
//! let speed = DistanceExpression::atomic_leq(DataStateExpression::variable(1));
//!
//! let drift =
//!     DistanceExpression::max_interval(DistanceExpression::max(position, speed), 0, 10).unwrap();
//! ```

use nonempty::NonEmpty;
use thiserror::Error;

use crate::ds::RelationOperator;
use crate::functions::DataStateExpression;
use crate::interval::{Interval, IntervalError};
use crate::random::SimRng;
use crate::sample::{BootstrapConfig, DistanceMetric, SampleError};
use crate::sequence::EvolutionSequence;

const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistanceError {
    #[error("Interval error: {0}")]
    IntervalError(#[from] IntervalError),

    #[error("Expected {expected} weights, found {found}")]
    WeightCount { expected: usize, found: usize },

    #[error("Weights must be non-negative and sum to one, found {0:?}")]
    InvalidWeights(Vec<f64>),

    #[error("Sample error: {0}")]
    SampleError(#[from] SampleError),
}

/// Point value of a distance together with its confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Estimate {
    pub fn new(point: f64, lower: f64, upper: f64) -> Self {
        Self { point, lower, upper }
    }

    /// An estimate without uncertainty.
    pub fn exact(value: f64) -> Self {
        Self::new(value, value, value)
    }

    fn zip_with<F>(self, other: Self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        Self {
            point: f(self.point, other.point),
            lower: f(self.lower, other.lower),
            upper: f(self.upper, other.upper),
        }
    }

    fn scale(self, weight: f64) -> Self {
        Self::new(self.point * weight, self.lower * weight, self.upper * weight)
    }

    /// Classify the estimate against a threshold.
    ///
    /// The result is `0` when the relation holds for the point value and `1` otherwise. When the
    /// threshold lies strictly inside the confidence interval, the interval of the result is the
    /// uninformative `[0, 1]`.
    pub fn threshold(self, relation: RelationOperator, threshold: f64) -> Self {
        let point = if relation.eval(self.point, threshold) { 0.0 } else { 1.0 };

        if self.lower < threshold && threshold < self.upper {
            Self::new(point, 0.0, 1.0)
        } else {
            Self::exact(point)
        }
    }
}

#[derive(Clone, Debug)]
pub enum DistanceExpression {
    Atomic {
        expression: DataStateExpression,
        metric: DistanceMetric,
    },
    ConvexCombination(Box<NonEmpty<(f64, DistanceExpression)>>),
    Max(Box<DistanceExpression>, Box<DistanceExpression>),
    Min(Box<DistanceExpression>, Box<DistanceExpression>),
    MaxInterval {
        argument: Box<DistanceExpression>,
        interval: Interval,
    },
    MinInterval {
        argument: Box<DistanceExpression>,
        interval: Interval,
    },
    Until {
        left: Box<DistanceExpression>,
        interval: Interval,
        right: Box<DistanceExpression>,
    },
    Threshold {
        argument: Box<DistanceExpression>,
        relation: RelationOperator,
        threshold: f64,
    },
}

fn fold_max(acc: f64, value: f64) -> f64 {
    acc.max(value)
}

fn fold_min(acc: f64, value: f64) -> f64 {
    acc.min(value)
}

/// Nested fold of the until operators over the values of the left and right operands.
///
/// `right[i]` is the value of the right operand at the `i`-th step of the interval and `left[i]`
/// the value of the left operand at the same step. The result is `outer` over `i` of
/// `inner(right[i], left[0], ..., left[i - 1])`.
pub(crate) fn until_fold<T, I, O>(left: &[T], right: &[T], inner: I, outer: O) -> Option<T>
where
    T: Copy,
    I: Fn(T, T) -> T,
    O: Fn(T, T) -> T,
{
    let mut prefix: Option<T> = None;
    let mut result: Option<T> = None;

    for (index, r) in right.iter().enumerate() {
        let candidate = match prefix {
            Some(p) => inner(*r, p),
            None => *r,
        };

        result = Some(match result {
            Some(acc) => outer(acc, candidate),
            None => candidate,
        });

        if let Some(l) = left.get(index) {
            prefix = Some(match prefix {
                Some(p) => inner(p, *l),
                None => *l,
            });
        }
    }

    result
}

impl DistanceExpression {
    pub fn atomic(expression: DataStateExpression, metric: DistanceMetric) -> Self {
        Self::Atomic { expression, metric }
    }

    /// Distance accounting for the observations of the second sequence above the first.
    pub fn atomic_leq(expression: DataStateExpression) -> Self {
        Self::atomic(expression, DistanceMetric::Leq)
    }

    /// Distance accounting for the observations of the second sequence below the first.
    pub fn atomic_geq(expression: DataStateExpression) -> Self {
        Self::atomic(expression, DistanceMetric::Geq)
    }

    pub fn convex_combination(
        weights: Vec<f64>,
        expressions: Vec<DistanceExpression>,
    ) -> Result<Self, DistanceError> {
        if weights.len() != expressions.len() {
            return Err(DistanceError::WeightCount {
                expected: expressions.len(),
                found: weights.len(),
            });
        }

        let total: f64 = weights.iter().sum();

        let negative = weights.iter().any(|w| w.is_nan() || *w < 0.0);

        if negative || (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(DistanceError::InvalidWeights(weights));
        }

        let terms = NonEmpty::from_vec(weights.into_iter().zip(expressions).collect())
            .ok_or(DistanceError::WeightCount { expected: 1, found: 0 })?;

        Ok(Self::ConvexCombination(Box::new(terms)))
    }

    pub fn max(left: DistanceExpression, right: DistanceExpression) -> Self {
        Self::Max(Box::new(left), Box::new(right))
    }

    pub fn min(left: DistanceExpression, right: DistanceExpression) -> Self {
        Self::Min(Box::new(left), Box::new(right))
    }

    pub fn max_interval(
        argument: DistanceExpression,
        from: usize,
        to: usize,
    ) -> Result<Self, DistanceError> {
        Ok(Self::MaxInterval {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn min_interval(
        argument: DistanceExpression,
        from: usize,
        to: usize,
    ) -> Result<Self, DistanceError> {
        Ok(Self::MinInterval {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn until(
        left: DistanceExpression,
        from: usize,
        to: usize,
        right: DistanceExpression,
    ) -> Result<Self, DistanceError> {
        Ok(Self::Until {
            left: Box::new(left),
            interval: Interval::new(from, to)?,
            right: Box::new(right),
        })
    }

    pub fn threshold(
        argument: DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
    ) -> Self {
        Self::Threshold {
            argument: Box::new(argument),
            relation,
            threshold,
        }
    }

    /// Point value of the distance between `first` and `second` at `step`.
    pub fn compute(
        &self,
        step: usize,
        first: &EvolutionSequence,
        second: &EvolutionSequence,
    ) -> Result<f64, DistanceError> {
        match self {
            Self::Atomic { expression, metric } => {
                let a = first.get(step);
                let b = second.get(step);

                Ok(a.distance(expression, metric, b.as_ref())?)
            }
            Self::ConvexCombination(terms) => {
                terms.iter().try_fold(0.0, |acc, (weight, expression)| {
                    Ok::<_, DistanceError>(acc + weight * expression.compute(step, first, second)?)
                })
            }
            Self::Max(left, right) => {
                Ok(left.compute(step, first, second)?.max(right.compute(step, first, second)?))
            }
            Self::Min(left, right) => {
                Ok(left.compute(step, first, second)?.min(right.compute(step, first, second)?))
            }
            Self::MaxInterval { argument, interval } => interval
                .shift(step)
                .map(|t| argument.compute(t, first, second))
                .try_fold(f64::NAN, |acc, value| Ok::<_, DistanceError>(fold_max(acc, value?))),
            Self::MinInterval { argument, interval } => interval
                .shift(step)
                .map(|t| argument.compute(t, first, second))
                .try_fold(f64::NAN, |acc, value| Ok::<_, DistanceError>(fold_min(acc, value?))),
            Self::Until { left, interval, right } => {
                let range = interval.shift(step);
                let lefts = (range.start..range.end - 1)
                    .map(|t| left.compute(t, first, second))
                    .collect::<Result<Vec<_>, _>>()?;
                let rights = range
                    .map(|t| right.compute(t, first, second))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(until_fold(&lefts, &rights, fold_max, fold_min).unwrap_or(f64::NAN))
            }
            Self::Threshold { argument, relation, threshold } => {
                let value = argument.compute(step, first, second)?;
                Ok(if relation.eval(value, *threshold) { 0.0 } else { 1.0 })
            }
        }
    }

    /// Point values of the distance for every step in `from..to`.
    pub fn compute_range(
        &self,
        from: usize,
        to: usize,
        first: &EvolutionSequence,
        second: &EvolutionSequence,
    ) -> Result<Vec<f64>, DistanceError> {
        (from..to).map(|step| self.compute(step, first, second)).collect()
    }

    /// Point value and bootstrap confidence interval of the distance at `step`.
    pub fn eval_ci(
        &self,
        rng: &mut SimRng,
        step: usize,
        first: &EvolutionSequence,
        second: &EvolutionSequence,
        config: &BootstrapConfig,
    ) -> Result<Estimate, DistanceError> {
        match self {
            Self::Atomic { expression, metric } => {
                let a = first.get(step);
                let b = second.get(step);
                let point = a.distance(expression, metric, b.as_ref())?;
                let ci = a.bootstrap_distance(rng, expression, metric, b.as_ref(), config)?;

                Ok(Estimate::new(point, ci.lower.min(point), ci.upper.max(point)))
            }
            Self::ConvexCombination(terms) => {
                let mut total = Estimate::exact(0.0);

                for (weight, expression) in terms.iter() {
                    let estimate = expression.eval_ci(rng, step, first, second, config)?;
                    total = total.zip_with(estimate.scale(*weight), |a, b| a + b);
                }

                Ok(total)
            }
            Self::Max(left, right) => {
                let l = left.eval_ci(rng, step, first, second, config)?;
                let r = right.eval_ci(rng, step, first, second, config)?;

                Ok(l.zip_with(r, f64::max))
            }
            Self::Min(left, right) => {
                let l = left.eval_ci(rng, step, first, second, config)?;
                let r = right.eval_ci(rng, step, first, second, config)?;

                Ok(l.zip_with(r, f64::min))
            }
            Self::MaxInterval { argument, interval } => {
                let mut acc = Estimate::exact(f64::NAN);

                for t in interval.shift(step) {
                    acc = acc.zip_with(argument.eval_ci(rng, t, first, second, config)?, fold_max);
                }

                Ok(acc)
            }
            Self::MinInterval { argument, interval } => {
                let mut acc = Estimate::exact(f64::NAN);

                for t in interval.shift(step) {
                    acc = acc.zip_with(argument.eval_ci(rng, t, first, second, config)?, fold_min);
                }

                Ok(acc)
            }
            Self::Until { left, interval, right } => {
                let range = interval.shift(step);
                let mut lefts = Vec::with_capacity(range.len());
                let mut rights = Vec::with_capacity(range.len());

                for t in range.clone() {
                    if t + 1 < range.end {
                        lefts.push(left.eval_ci(rng, t, first, second, config)?);
                    }

                    rights.push(right.eval_ci(rng, t, first, second, config)?);
                }

                let combine =
                    |f: fn(f64, f64) -> f64| move |a: Estimate, b: Estimate| a.zip_with(b, f);
                let folded = until_fold(&lefts, &rights, combine(fold_max), combine(fold_min));

                Ok(folded.unwrap_or(Estimate::exact(f64::NAN)))
            }
            Self::Threshold { argument, relation, threshold } => {
                let estimate = argument.eval_ci(rng, step, first, second, config)?;
                Ok(estimate.threshold(*relation, *threshold))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::Rng;

    use crate::controller::Controller;
    use crate::ds::{DataState, DataStateUpdate, RelationOperator};
    use crate::functions::{DataStateExpression, DataStateFunction};
    use crate::random::Seed;
    use crate::sample::BootstrapConfig;
    use crate::sequence::EvolutionSequence;
    use crate::system::SystemState;
    use super::{until_fold, DistanceError, DistanceExpression, Estimate};

    const EPSILON: f64 = 1e-9;

    fn drifting(rate0: f64, start1: f64, rate1: f64) -> EvolutionSequence {
        let environment = DataStateFunction::new(move |_, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] + rate0), DataStateUpdate::new(1, s[1] + rate1)])
        });

        EvolutionSequence::new(
            0,
            move |_| {
                let initial = DataState::new(vec![0.0, start1]);
                SystemState::new(Controller::Nil, environment.clone(), initial)
            },
            4,
        )
    }

    fn noisy(seed: u64, spread: f64) -> EvolutionSequence {
        let environment = DataStateFunction::new(move |rng, s| {
            s.apply(&[
                DataStateUpdate::new(0, rng.gen::<f64>() * spread),
                DataStateUpdate::new(1, rng.gen::<f64>()),
            ])
        });

        EvolutionSequence::new(
            seed,
            move |_| {
                let initial = DataState::new(vec![0.0, 0.0]);
                SystemState::new(Controller::Nil, environment.clone(), initial)
            },
            30,
        )
    }

    fn x(index: usize) -> DistanceExpression {
        DistanceExpression::atomic_leq(DataStateExpression::variable(index))
    }

    #[test]
    fn atomic_distances() -> Result<(), DistanceError> {
        let nominal = drifting(0.0, 0.0, 0.0);
        let drifted = drifting(0.1, 0.0, 0.0);

        assert_relative_eq!(x(0).compute(3, &nominal, &drifted)?, 0.3, epsilon = EPSILON);
        let below = DistanceExpression::atomic_geq(DataStateExpression::variable(0));
        assert_relative_eq!(below.compute(3, &nominal, &drifted)?, 0.0, epsilon = EPSILON);

        let values = x(0).compute_range(0, 3, &nominal, &drifted)?;
        assert_eq!(values.len(), 3);
        assert_relative_eq!(values[2], 0.2, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn interval_expressions() -> Result<(), DistanceError> {
        let nominal = drifting(0.0, 0.0, 0.0);
        let drifted = drifting(0.1, 0.0, 0.0);

        let max = DistanceExpression::max_interval(x(0), 0, 3)?;
        let min = DistanceExpression::min_interval(x(0), 0, 3)?;

        assert_relative_eq!(max.compute(1, &nominal, &drifted)?, 0.3, epsilon = EPSILON);
        assert_relative_eq!(min.compute(1, &nominal, &drifted)?, 0.1, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn until_is_min_of_max() -> Result<(), DistanceError> {
        let nominal = drifting(0.0, 0.0, 0.0);
        let drifted = drifting(0.1, 0.4, -0.1);

        let until = DistanceExpression::until(x(0), 0, 3, x(1))?;

        assert_relative_eq!(until.compute(0, &nominal, &drifted)?, 0.2, epsilon = EPSILON);
        assert_relative_eq!(until.compute(1, &nominal, &drifted)?, 0.2, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn until_fold_ignores_current_left() {
        let left = [0.9, 0.9];
        let right = [0.5, 0.1, 0.3];

        // t = 0: 0.5, t = 1: max(0.1, 0.9), t = 2: max(0.3, 0.9)
        assert_eq!(until_fold(&left, &right, f64::max, f64::min), Some(0.5));
        assert_eq!(until_fold(&[0.0, 0.0], &right, f64::max, f64::min), Some(0.1));
    }

    #[test]
    fn combinations() -> Result<(), DistanceError> {
        let nominal = drifting(0.0, 0.0, 0.0);
        let drifted = drifting(0.1, 0.0, 0.2);

        let convex = DistanceExpression::convex_combination(vec![0.25, 0.75], vec![x(0), x(1)])?;
        let max = DistanceExpression::max(x(0), x(1));
        let min = DistanceExpression::min(x(0), x(1));

        assert_relative_eq!(
            convex.compute(2, &nominal, &drifted)?,
            0.25 * 0.2 + 0.75 * 0.4,
            epsilon = EPSILON
        );
        assert_relative_eq!(max.compute(2, &nominal, &drifted)?, 0.4, epsilon = EPSILON);
        assert_relative_eq!(min.compute(2, &nominal, &drifted)?, 0.2, epsilon = EPSILON);

        let nested = DistanceExpression::convex_combination(vec![0.5, 0.5], vec![convex, x(0)])?;
        let expected = 0.5 * (0.25 * 0.2 + 0.75 * 0.4) + 0.5 * 0.2;
        assert_relative_eq!(nested.compute(2, &nominal, &drifted)?, expected, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn invalid_construction() {
        assert!(DistanceExpression::until(x(0), 3, 3, x(1)).is_err());
        assert!(DistanceExpression::max_interval(x(0), 4, 2).is_err());
        assert!(matches!(
            DistanceExpression::convex_combination(vec![0.5, 0.6], vec![x(0), x(1)]),
            Err(DistanceError::InvalidWeights(_))
        ));
        assert!(matches!(
            DistanceExpression::convex_combination(vec![1.0], vec![x(0), x(1)]),
            Err(DistanceError::WeightCount { expected: 2, found: 1 })
        ));
        assert!(DistanceExpression::convex_combination(vec![], vec![]).is_err());
    }

    #[test]
    fn threshold_with_uncertain_interval() {
        let estimate = Estimate::new(0.4, 0.3, 0.6).threshold(RelationOperator::LessThan, 0.5);
        assert_eq!(estimate, Estimate::new(0.0, 0.0, 1.0));

        let estimate = Estimate::new(0.4, 0.3, 0.45).threshold(RelationOperator::LessThan, 0.5);
        assert_eq!(estimate, Estimate::exact(0.0));

        let estimate = Estimate::new(0.7, 0.6, 0.8).threshold(RelationOperator::LessThan, 0.5);
        assert_eq!(estimate, Estimate::exact(1.0));
    }

    #[test]
    fn confidence_intervals_contain_point() -> Result<(), DistanceError> {
        let nominal = noisy(1, 0.5);
        let perturbed = noisy(2, 0.8);
        let config = BootstrapConfig::default();
        let mut rng = Seed::new(17).rng();

        let expressions = vec![
            x(0),
            DistanceExpression::convex_combination(vec![0.5, 0.5], vec![x(0), x(1)])?,
            DistanceExpression::max(x(0), x(1)),
            DistanceExpression::min(x(0), x(1)),
            DistanceExpression::max_interval(x(0), 0, 3)?,
            DistanceExpression::min_interval(x(1), 1, 3)?,
            DistanceExpression::until(x(0), 0, 3, x(1))?,
            DistanceExpression::threshold(x(0), RelationOperator::LessThan, 0.1),
        ];

        for expression in &expressions {
            for step in 1..4 {
                let estimate = expression.eval_ci(&mut rng, step, &nominal, &perturbed, &config)?;
                let point = expression.compute(step, &nominal, &perturbed)?;

                assert!(estimate.lower <= estimate.point, "{:?} at {}", estimate, step);
                assert!(estimate.point <= estimate.upper, "{:?} at {}", estimate, step);
                assert_relative_eq!(estimate.point, point, epsilon = EPSILON);
            }
        }

        Ok(())
    }
}
