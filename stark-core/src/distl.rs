//! Distribution temporal logic.
//!
//! A [`DisTlFormula`] expresses requirements on the distribution of the states of a system over
//! time. The basic formulas compare the sample set observed at a step with a reference
//! distribution:
//!
//!   - `Target(p)` requires the observed distribution to get at least as close to the reference
//!     as the threshold of `p`. Its value is `threshold - d`, where `d` only accounts for the
//!     observations falling below the reference.
//!   - `Brink(p)` requires the observed distribution to stay away from the reference. Its value is
//!     `d - threshold`, where `d` only accounts for the observations falling above the reference.
//!
//! Formulas are evaluated with a quantitative semantics: positive values mean satisfaction and
//! their magnitude measures how robustly the formula is satisfied. Temporal operators use closed
//! intervals `[a, b]` relative to the evaluation step.
//!
//! | Formula                 | Value at step `s`                                                  |
//! |-------------------------|--------------------------------------------------------------------|
//! | `True` / `False`        | `1` / `-1`                                                         |
//! | `!f`                    | `-f(s)`                                                            |
//! | `f & g` / `f \| g`      | `min(f(s), g(s))` / `max(f(s), g(s))`                              |
//! | `f -> g`                | `max(-f(s), g(s))`                                                 |
//! | `G[a, b] f`             | `min f(t)` for `t` in `[s + a, s + b]`                             |
//! | `F[a, b] f`             | `max f(t)` for `t` in `[s + a, s + b]`                             |
//! | `f U[a, b] g`           | `max` over `t` of `min(g(t), min f(j))` for `j` in `[s + a, t)`    |
//!
//! The unbounded until operator has no batch semantics and can only be monitored, see
//! [`crate::monitor`].
//!
//! ```rust
//! use stark::distl::{DisTlFormula, DistributionPredicate};
//! use stark::ds::DataStateUpdate;
//! use stark::functions::{DataStateExpression, DataStateFunction};
//!
//! let halve = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] / 2.0)]));
//! let predicate = DistributionPredicate::function(halve, DataStateExpression::variable(0), 0.2);
//! let target = DisTlFormula::target(predicate);
//! let formula = DisTlFormula::eventually(target, 0, 5).unwrap();
//!
//! assert_eq!(formula.first_evaluation_step(), 1);
//! assert_eq!(formula.time_horizon(), Some(6));
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use crate::combinator::Penalty;
use crate::distance::until_fold;
use crate::functions::{DataStateExpression, DataStateFunction};
use crate::interval::{Interval, IntervalError};
use crate::random::{Seed, SimRng};
use crate::sample::{DistanceMetric, SampleError, SampleSet};
use crate::sequence::EvolutionSequence;
use crate::system::PerceivedState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DisTlError {
    #[error("Interval error: {0}")]
    IntervalError(#[from] IntervalError),

    #[error("Sample error: {0}")]
    SampleError(#[from] SampleError),

    #[error("Unbounded until formulas can only be monitored")]
    UnboundedUntil,
}

/// Distribution the observed sample sets are compared with.
#[derive(Clone, Debug)]
pub enum Reference {
    /// Obtained by applying a stochastic transformation to replicas of the observed sample set.
    Function(DataStateFunction),

    /// A fixed sample set.
    Samples(Arc<SampleSet<PerceivedState>>),
}

/// Observation of the states used to compare two distributions.
#[derive(Clone, Debug)]
pub enum Scoring {
    Expression(DataStateExpression),

    /// The scoring function of the penalty at the evaluation step.
    Penalty(Penalty),
}

impl Scoring {
    fn at(&self, step: usize) -> DataStateExpression {
        match self {
            Self::Expression(expression) => expression.clone(),
            Self::Penalty(penalty) => penalty.effect_at(step),
        }
    }
}

impl From<DataStateExpression> for Scoring {
    fn from(expression: DataStateExpression) -> Self {
        Self::Expression(expression)
    }
}

impl From<Penalty> for Scoring {
    fn from(penalty: Penalty) -> Self {
        Self::Penalty(penalty)
    }
}

#[derive(Clone, Debug)]
pub struct DistributionPredicate {
    reference: Reference,
    scoring: Scoring,
    threshold: f64,
}

impl DistributionPredicate {
    pub fn new(reference: Reference, scoring: impl Into<Scoring>, threshold: f64) -> Self {
        Self {
            reference,
            scoring: scoring.into(),
            threshold,
        }
    }

    /// Predicate whose reference is obtained by applying `mu` to the observed sample set.
    pub fn function(mu: DataStateFunction, scoring: impl Into<Scoring>, threshold: f64) -> Self {
        Self::new(Reference::Function(mu), scoring, threshold)
    }

    /// Predicate comparing the observed sample sets with a fixed sample set.
    pub fn samples(
        samples: SampleSet<PerceivedState>,
        scoring: impl Into<Scoring>,
        threshold: f64,
    ) -> Self {
        Self::new(Reference::Samples(Arc::new(samples)), scoring, threshold)
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn scoring(&self) -> &Scoring {
        &self.scoring
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn distance(
        &self,
        rng: &mut SimRng,
        current: &SampleSet<PerceivedState>,
        sample_size: usize,
        step: usize,
        metric: &DistanceMetric,
    ) -> Result<f64, SampleError> {
        let sampled;
        let reference = match &self.reference {
            Reference::Function(mu) => {
                sampled = current.replica(sample_size).apply_distribution(rng, mu);
                &sampled
            }
            Reference::Samples(samples) => samples.as_ref(),
        };

        current.distance(&self.scoring.at(step), metric, reference)
    }

    /// Value of the target formula for the sample set observed at `step`.
    pub fn target(
        &self,
        rng: &mut SimRng,
        current: &SampleSet<PerceivedState>,
        sample_size: usize,
        step: usize,
    ) -> Result<f64, SampleError> {
        let distance = self.distance(rng, current, sample_size, step, &DistanceMetric::Geq)?;
        Ok(self.threshold - distance)
    }

    /// Value of the brink formula for the sample set observed at `step`.
    pub fn brink(
        &self,
        rng: &mut SimRng,
        current: &SampleSet<PerceivedState>,
        sample_size: usize,
        step: usize,
    ) -> Result<f64, SampleError> {
        let distance = self.distance(rng, current, sample_size, step, &DistanceMetric::Leq)?;
        Ok(distance - self.threshold)
    }
}

#[derive(Clone, Debug)]
pub enum DisTlFormula {
    True,
    False,
    Target(DistributionPredicate),
    Brink(DistributionPredicate),
    Negation(Box<DisTlFormula>),
    Conjunction(Box<DisTlFormula>, Box<DisTlFormula>),
    Disjunction(Box<DisTlFormula>, Box<DisTlFormula>),
    Implication(Box<DisTlFormula>, Box<DisTlFormula>),
    Always {
        argument: Box<DisTlFormula>,
        interval: Interval,
    },
    Eventually {
        argument: Box<DisTlFormula>,
        interval: Interval,
    },
    Until {
        left: Box<DisTlFormula>,
        interval: Interval,
        right: Box<DisTlFormula>,
    },
    UnboundedUntil {
        left: Box<DisTlFormula>,
        right: Box<DisTlFormula>,
    },
}

/// Evaluation function of a formula: `(sample_size, step, sequence) -> value`.
pub type DisTlFunction =
    Box<dyn Fn(usize, usize, &EvolutionSequence) -> Result<f64, DisTlError> + Send + Sync>;

fn max_horizon(values: &[Option<usize>]) -> Option<usize> {
    values.iter().try_fold(0, |acc, value| value.map(|v| acc.max(v)))
}

impl DisTlFormula {
    pub fn target(predicate: DistributionPredicate) -> Self {
        Self::Target(predicate)
    }

    pub fn brink(predicate: DistributionPredicate) -> Self {
        Self::Brink(predicate)
    }

    pub fn negation(argument: DisTlFormula) -> Self {
        Self::Negation(Box::new(argument))
    }

    pub fn conjunction(left: DisTlFormula, right: DisTlFormula) -> Self {
        Self::Conjunction(Box::new(left), Box::new(right))
    }

    pub fn disjunction(left: DisTlFormula, right: DisTlFormula) -> Self {
        Self::Disjunction(Box::new(left), Box::new(right))
    }

    pub fn implication(left: DisTlFormula, right: DisTlFormula) -> Self {
        Self::Implication(Box::new(left), Box::new(right))
    }

    pub fn always(argument: DisTlFormula, from: usize, to: usize) -> Result<Self, DisTlError> {
        Ok(Self::Always {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn eventually(argument: DisTlFormula, from: usize, to: usize) -> Result<Self, DisTlError> {
        Ok(Self::Eventually {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn until(
        left: DisTlFormula,
        from: usize,
        to: usize,
        right: DisTlFormula,
    ) -> Result<Self, DisTlError> {
        Ok(Self::Until {
            left: Box::new(left),
            interval: Interval::new(from, to)?,
            right: Box::new(right),
        })
    }

    pub fn unbounded_until(left: DisTlFormula, right: DisTlFormula) -> Self {
        Self::UnboundedUntil {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Number of observations needed before the formula has a value.
    pub fn first_evaluation_step(&self) -> usize {
        match self {
            Self::True | Self::False => 0,
            Self::Target(_) | Self::Brink(_) => 1,
            Self::Negation(argument) => argument.first_evaluation_step(),
            Self::Conjunction(left, right)
            | Self::Disjunction(left, right)
            | Self::Implication(left, right) => {
                left.first_evaluation_step().max(right.first_evaluation_step())
            }
            Self::Always { argument, interval } | Self::Eventually { argument, interval } => {
                argument.first_evaluation_step().max(1).saturating_add(interval.from())
            }
            Self::Until { left, interval, right } => left
                .first_evaluation_step()
                .max(right.first_evaluation_step())
                .max(1)
                .saturating_add(interval.from()),
            Self::UnboundedUntil { left, right } => left
                .first_evaluation_step()
                .max(right.first_evaluation_step())
                .max(1),
        }
    }

    /// Number of observations after which the value of the formula cannot change, if bounded.
    pub fn time_horizon(&self) -> Option<usize> {
        match self {
            Self::True | Self::False => Some(0),
            Self::Target(_) | Self::Brink(_) => Some(1),
            Self::Negation(argument) => argument.time_horizon(),
            Self::Conjunction(left, right)
            | Self::Disjunction(left, right)
            | Self::Implication(left, right) => {
                max_horizon(&[left.time_horizon(), right.time_horizon()])
            }
            Self::Always { argument, interval } | Self::Eventually { argument, interval } => {
                Some(argument.time_horizon()?.max(1).saturating_add(interval.to()))
            }
            Self::Until { left, interval, right } => {
                let left = left.time_horizon()?.saturating_sub(1);
                let right = right.time_horizon()?;

                Some(left.max(right).max(1).saturating_add(interval.to()))
            }
            Self::UnboundedUntil { .. } => None,
        }
    }

    pub fn double_evaluation_function(&self, semantics: DoubleSemantics) -> DisTlFunction {
        let formula = self.clone();
        Box::new(move |sample_size, step, sequence| {
            semantics.eval(&formula, sample_size, step, sequence)
        })
    }
}

/// Quantitative evaluation of formulas over an evolution sequence.
///
/// Every operand of a formula is given a seed derived from the seed of its parent and its
/// position: `0` for the argument of a negation or of a temporal operator and for the left operand
/// of a binary operator, `1` for the right operand. The reference distribution of a target or
/// brink formula evaluated at step `t` is sampled with a generator derived from the seed of the
/// formula and `t`. Evaluations are reproducible and do not depend on parallelism. They coincide
/// with the values computed by monitors built with the same seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSemantics {
    seed: Seed,
    parallel: bool,
}

impl DoubleSemantics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Seed::new(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn eval(
        &self,
        formula: &DisTlFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
    ) -> Result<f64, DisTlError> {
        self.evaluate(formula, sample_size, step, sequence, self.seed)
    }

    fn evaluate(
        &self,
        formula: &DisTlFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<f64, DisTlError> {
        match formula {
            DisTlFormula::True => Ok(1.0),
            DisTlFormula::False => Ok(-1.0),
            DisTlFormula::Target(predicate) => {
                let current = sequence.perceived(step);
                let mut rng = seed.fork(step as u64).rng();

                Ok(predicate.target(&mut rng, &current, sample_size, step)?)
            }
            DisTlFormula::Brink(predicate) => {
                let current = sequence.perceived(step);
                let mut rng = seed.fork(step as u64).rng();

                Ok(predicate.brink(&mut rng, &current, sample_size, step)?)
            }
            DisTlFormula::Negation(argument) => {
                Ok(-self.evaluate(argument, sample_size, step, sequence, seed.fork(0))?)
            }
            DisTlFormula::Conjunction(left, right) => {
                let (l, r) = self.both(left, right, sample_size, step, sequence, seed)?;
                Ok(l.min(r))
            }
            DisTlFormula::Disjunction(left, right) => {
                let (l, r) = self.both(left, right, sample_size, step, sequence, seed)?;
                Ok(l.max(r))
            }
            DisTlFormula::Implication(left, right) => {
                let (l, r) = self.both(left, right, sample_size, step, sequence, seed)?;
                Ok((-l).max(r))
            }
            DisTlFormula::Always { argument, interval } => {
                let steps = interval.shift_closed(step);
                let values = self.values(argument, steps, sample_size, sequence, seed.fork(0))?;
                Ok(values.into_iter().fold(f64::NAN, f64::min))
            }
            DisTlFormula::Eventually { argument, interval } => {
                let steps = interval.shift_closed(step);
                let values = self.values(argument, steps, sample_size, sequence, seed.fork(0))?;
                Ok(values.into_iter().fold(f64::NAN, f64::max))
            }
            DisTlFormula::Until { left, interval, right } => {
                let steps = interval.shift_closed(step);
                let (start, end) = (*steps.start(), *steps.end());
                let (left_seed, right_seed) = (seed.fork(0), seed.fork(1));

                let (lefts, rights) = if self.parallel {
                    let (lefts, rights) = rayon::join(
                        || self.values(left, start..=end - 1, sample_size, sequence, left_seed),
                        || self.values(right, steps.clone(), sample_size, sequence, right_seed),
                    );
                    (lefts?, rights?)
                } else {
                    (
                        self.values(left, start..=end - 1, sample_size, sequence, left_seed)?,
                        self.values(right, steps, sample_size, sequence, right_seed)?,
                    )
                };

                Ok(until_fold(&lefts, &rights, f64::min, f64::max).unwrap_or(f64::NAN))
            }
            DisTlFormula::UnboundedUntil { .. } => Err(DisTlError::UnboundedUntil),
        }
    }

    fn both(
        &self,
        left: &DisTlFormula,
        right: &DisTlFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<(f64, f64), DisTlError> {
        let eval_left = || self.evaluate(left, sample_size, step, sequence, seed.fork(0));
        let eval_right = || self.evaluate(right, sample_size, step, sequence, seed.fork(1));

        if self.parallel {
            let (l, r) = rayon::join(eval_left, eval_right);
            return Ok((l?, r?));
        }

        Ok((eval_left()?, eval_right()?))
    }

    /// Values of `formula` at every step in `steps`.
    fn values(
        &self,
        formula: &DisTlFormula,
        steps: RangeInclusive<usize>,
        sample_size: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<Vec<f64>, DisTlError> {
        let eval = |t| self.evaluate(formula, sample_size, t, sequence, seed);

        if self.parallel {
            steps.into_par_iter().map(eval).collect()
        } else {
            steps.map(eval).collect()
        }
    }
}
