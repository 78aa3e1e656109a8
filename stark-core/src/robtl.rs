//! Robustness temporal logic.
//!
//! A [`RobustnessFormula`] expresses requirements on how much a perturbation is allowed to move an
//! evolution sequence away from its nominal behavior. The atomic formula applies a
//! [`Perturbation`] to the evaluated sequence at the current step, measures the drift with a
//! [`DistanceExpression`] and compares it against a threshold. Atomic formulas are combined with
//! the usual connectives and with bounded temporal operators whose intervals `[a, b)` are relative
//! to the evaluation step.
//!
//! Formulas have two interpretations:
//!
//!   - [`BooleanSemantics`] compares the point value of the distance with the threshold.
//!   - [`ThreeValuedSemantics`] uses a bootstrap confidence interval of the distance and returns
//!     [`TruthValue::Unknown`] whenever the threshold falls strictly inside the interval.
//!
//! Connectives of the three-valued semantics follow the strong Kleene tables:
//!
//! | `a`       | `b`       | `a.and(b)` | `a.or(b)` |
//! |-----------|-----------|------------|-----------|
//! | `True`    | `True`    | `True`     | `True`    |
//! | `True`    | `Unknown` | `Unknown`  | `True`    |
//! | `True`    | `False`   | `False`    | `True`    |
//! | `Unknown` | `Unknown` | `Unknown`  | `Unknown` |
//! | `Unknown` | `False`   | `False`    | `Unknown` |
//! | `False`   | `False`   | `False`    | `False`   |
//!
//! Both semantics can evaluate the steps of temporal operators and the operands of binary
//! connectives in parallel. Sequential evaluation stops a fold as soon as its result is decided.
//! Every operand is given a generator derived from its position in the formula, so parallel and
//! sequential evaluations produce the same result.

use std::ops::{Not, Range};

use rayon::prelude::*;
use thiserror::Error;

use crate::combinator::Perturbation;
use crate::distance::{DistanceError, DistanceExpression};
use crate::ds::RelationOperator;
use crate::interval::{Interval, IntervalError};
use crate::random::Seed;
use crate::sample::BootstrapConfig;
use crate::sequence::{EvolutionSequence, SequenceError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RobustnessError {
    #[error("Interval error: {0}")]
    IntervalError(#[from] IntervalError),

    #[error("Distance error: {0}")]
    DistanceError(#[from] DistanceError),

    #[error("Sequence error: {0}")]
    SequenceError(#[from] SequenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TruthValue {
    True,
    Unknown,
    False,
}

impl TruthValue {
    pub fn and(self, other: TruthValue) -> TruthValue {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Unknown,
        }
    }

    pub fn or(self, other: TruthValue) -> TruthValue {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Unknown,
        }
    }

    pub fn neg(self) -> TruthValue {
        match self {
            Self::True => Self::False,
            Self::Unknown => Self::Unknown,
            Self::False => Self::True,
        }
    }

    pub fn implies(self, other: TruthValue) -> TruthValue {
        self.neg().or(other)
    }

    /// Numeric encoding: `1` for true, `0` for unknown and `-1` for false.
    pub fn value(self) -> i32 {
        match self {
            Self::True => 1,
            Self::Unknown => 0,
            Self::False => -1,
        }
    }
}

impl Not for TruthValue {
    type Output = TruthValue;

    fn not(self) -> Self::Output {
        self.neg()
    }
}

impl From<bool> for TruthValue {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

#[derive(Clone, Debug)]
pub enum RobustnessFormula {
    True,
    False,
    Atomic {
        perturbation: Perturbation,
        distance: DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
    },
    Negation(Box<RobustnessFormula>),
    Conjunction(Box<RobustnessFormula>, Box<RobustnessFormula>),
    Disjunction(Box<RobustnessFormula>, Box<RobustnessFormula>),
    Implication(Box<RobustnessFormula>, Box<RobustnessFormula>),
    Always {
        argument: Box<RobustnessFormula>,
        interval: Interval,
    },
    Eventually {
        argument: Box<RobustnessFormula>,
        interval: Interval,
    },
    Until {
        left: Box<RobustnessFormula>,
        interval: Interval,
        right: Box<RobustnessFormula>,
    },
}

/// Evaluation function of a formula: `(sample_size, step, sequence) -> value`.
pub type RobustnessFunction<T> =
    Box<dyn Fn(usize, usize, &EvolutionSequence) -> Result<T, RobustnessError> + Send + Sync>;

impl RobustnessFormula {
    pub fn atomic(
        perturbation: Perturbation,
        distance: DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
    ) -> Self {
        Self::Atomic {
            perturbation,
            distance,
            relation,
            threshold,
        }
    }

    pub fn negation(argument: RobustnessFormula) -> Self {
        Self::Negation(Box::new(argument))
    }

    pub fn conjunction(left: RobustnessFormula, right: RobustnessFormula) -> Self {
        Self::Conjunction(Box::new(left), Box::new(right))
    }

    pub fn disjunction(left: RobustnessFormula, right: RobustnessFormula) -> Self {
        Self::Disjunction(Box::new(left), Box::new(right))
    }

    pub fn implication(left: RobustnessFormula, right: RobustnessFormula) -> Self {
        Self::Implication(Box::new(left), Box::new(right))
    }

    pub fn always(
        argument: RobustnessFormula,
        from: usize,
        to: usize,
    ) -> Result<Self, RobustnessError> {
        Ok(Self::Always {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn eventually(
        argument: RobustnessFormula,
        from: usize,
        to: usize,
    ) -> Result<Self, RobustnessError> {
        Ok(Self::Eventually {
            argument: Box::new(argument),
            interval: Interval::new(from, to)?,
        })
    }

    pub fn until(
        left: RobustnessFormula,
        from: usize,
        to: usize,
        right: RobustnessFormula,
    ) -> Result<Self, RobustnessError> {
        Ok(Self::Until {
            left: Box::new(left),
            interval: Interval::new(from, to)?,
            right: Box::new(right),
        })
    }

    pub fn boolean_evaluation_function(
        &self,
        semantics: BooleanSemantics,
    ) -> RobustnessFunction<bool> {
        let formula = self.clone();
        Box::new(move |sample_size, step, sequence| {
            semantics.eval(&formula, sample_size, step, sequence)
        })
    }

    pub fn three_valued_evaluation_function(
        &self,
        semantics: ThreeValuedSemantics,
    ) -> RobustnessFunction<TruthValue> {
        let formula = self.clone();
        Box::new(move |sample_size, step, sequence| {
            semantics.eval(&formula, sample_size, step, sequence)
        })
    }
}

/// Operations on the values of a semantics needed to fold temporal operators.
trait Lattice: Copy + Send + Sync {
    fn top() -> Self;
    fn bottom() -> Self;
    fn meet(self, other: Self) -> Self;
    fn join(self, other: Self) -> Self;
}

impl Lattice for bool {
    fn top() -> Self {
        true
    }

    fn bottom() -> Self {
        false
    }

    fn meet(self, other: Self) -> Self {
        self && other
    }

    fn join(self, other: Self) -> Self {
        self || other
    }
}

impl Lattice for TruthValue {
    fn top() -> Self {
        TruthValue::True
    }

    fn bottom() -> Self {
        TruthValue::False
    }

    fn meet(self, other: Self) -> Self {
        self.and(other)
    }

    fn join(self, other: Self) -> Self {
        self.or(other)
    }
}

/// Shared evaluation of the connectives and temporal operators of both semantics.
trait Semantics: Sync {
    type Value: Lattice + PartialEq;

    fn parallel(&self) -> bool;

    #[allow(clippy::too_many_arguments)]
    fn atomic(
        &self,
        perturbation: &Perturbation,
        distance: &DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<Self::Value, RobustnessError>;

    fn negate(value: Self::Value) -> Self::Value;

    fn evaluate(
        &self,
        formula: &RobustnessFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<Self::Value, RobustnessError> {
        let meet = <Self::Value as Lattice>::meet;
        let join = <Self::Value as Lattice>::join;

        match formula {
            RobustnessFormula::True => Ok(Self::Value::top()),
            RobustnessFormula::False => Ok(Self::Value::bottom()),
            RobustnessFormula::Atomic {
                perturbation,
                distance,
                relation,
                threshold,
            } => self.atomic(
                perturbation,
                distance,
                *relation,
                *threshold,
                sample_size,
                step,
                sequence,
                seed,
            ),
            RobustnessFormula::Negation(argument) => {
                let value = self.evaluate(argument, sample_size, step, sequence, seed.fork(0))?;
                Ok(Self::negate(value))
            }
            RobustnessFormula::Conjunction(left, right) => {
                let bottom = Self::Value::bottom();
                self.binary(left, right, sample_size, step, sequence, seed, bottom, meet)
            }
            RobustnessFormula::Disjunction(left, right) => {
                let top = Self::Value::top();
                self.binary(left, right, sample_size, step, sequence, seed, top, join)
            }
            RobustnessFormula::Implication(left, right) => {
                let negated = RobustnessFormula::Negation(left.clone());
                let top = Self::Value::top();
                self.binary(&negated, right, sample_size, step, sequence, seed, top, join)
            }
            RobustnessFormula::Always { argument, interval } => {
                let steps = interval.shift(step);
                self.fold(argument, steps, sample_size, sequence, seed, Self::Value::top(), meet)
            }
            RobustnessFormula::Eventually { argument, interval } => {
                let steps = interval.shift(step);
                self.fold(argument, steps, sample_size, sequence, seed, Self::Value::bottom(), join)
            }
            RobustnessFormula::Until { left, interval, right } => {
                self.until(left, right, interval.shift(step), sample_size, sequence, seed)
            }
        }
    }

    /// Combine two operands, skipping the right one when the left one equals `absorbing`.
    #[allow(clippy::too_many_arguments)]
    fn binary<F>(
        &self,
        left: &RobustnessFormula,
        right: &RobustnessFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
        absorbing: Self::Value,
        combine: F,
    ) -> Result<Self::Value, RobustnessError>
    where
        F: Fn(Self::Value, Self::Value) -> Self::Value,
    {
        let eval_left = || self.evaluate(left, sample_size, step, sequence, seed.fork(0));
        let eval_right = || self.evaluate(right, sample_size, step, sequence, seed.fork(1));

        if self.parallel() {
            let (l, r) = rayon::join(eval_left, eval_right);
            return Ok(combine(l?, r?));
        }

        let l = eval_left()?;

        if l == absorbing {
            return Ok(l);
        }

        Ok(combine(l, eval_right()?))
    }

    /// Fold the values of `argument` over `steps`, starting from the neutral element `init`.
    #[allow(clippy::too_many_arguments)]
    fn fold<F>(
        &self,
        argument: &RobustnessFormula,
        steps: Range<usize>,
        sample_size: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
        init: Self::Value,
        combine: F,
    ) -> Result<Self::Value, RobustnessError>
    where
        F: Fn(Self::Value, Self::Value) -> Self::Value + Send + Sync,
    {
        let eval =
            |t: usize| self.evaluate(argument, sample_size, t, sequence, seed.fork(t as u64));

        if self.parallel() {
            return steps
                .into_par_iter()
                .map(eval)
                .try_reduce(|| init, |a, b| Ok(combine(a, b)));
        }

        let mut acc = init;

        for t in steps {
            acc = combine(acc, eval(t)?);

            if acc == Self::negate(init) {
                break;
            }
        }

        Ok(acc)
    }

    fn until(
        &self,
        left: &RobustnessFormula,
        right: &RobustnessFormula,
        steps: Range<usize>,
        sample_size: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<Self::Value, RobustnessError> {
        let last = steps.end.saturating_sub(1);
        let (left_seed, right_seed) = (seed.fork(0), seed.fork(1));
        let eval_left =
            |t: usize| self.evaluate(left, sample_size, t, sequence, left_seed.fork(t as u64));
        let eval_right =
            |t: usize| self.evaluate(right, sample_size, t, sequence, right_seed.fork(t as u64));

        if self.parallel() {
            let (lefts, rights) = rayon::join(
                || {
                    (steps.start..last)
                        .into_par_iter()
                        .map(eval_left)
                        .collect::<Result<Vec<_>, _>>()
                },
                || {
                    steps
                        .clone()
                        .into_par_iter()
                        .map(eval_right)
                        .collect::<Result<Vec<_>, _>>()
                },
            );
            let (lefts, rights) = (lefts?, rights?);
            let mut prefix = Self::Value::top();
            let mut acc = Self::Value::bottom();

            for (index, r) in rights.into_iter().enumerate() {
                acc = acc.join(prefix.meet(r));

                if let Some(l) = lefts.get(index) {
                    prefix = prefix.meet(*l);
                }
            }

            return Ok(acc);
        }

        let mut prefix = Self::Value::top();
        let mut acc = Self::Value::bottom();

        for t in steps {
            acc = acc.join(prefix.meet(eval_right(t)?));

            if acc == Self::Value::top() || t == last {
                break;
            }

            prefix = prefix.meet(eval_left(t)?);

            if prefix == Self::Value::bottom() {
                break;
            }
        }

        Ok(acc)
    }
}

/// Exact evaluation of formulas comparing point distances with thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanSemantics {
    parallel: bool,
}

impl BooleanSemantics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn eval(
        &self,
        formula: &RobustnessFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
    ) -> Result<bool, RobustnessError> {
        self.evaluate(formula, sample_size, step, sequence, Seed::default())
    }
}

impl Semantics for BooleanSemantics {
    type Value = bool;

    fn parallel(&self) -> bool {
        self.parallel
    }

    #[allow(clippy::too_many_arguments)]
    fn atomic(
        &self,
        perturbation: &Perturbation,
        distance: &DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        _seed: Seed,
    ) -> Result<bool, RobustnessError> {
        let perturbed = sequence.apply(perturbation, step, sample_size)?;
        let value = distance.compute(step, sequence, &perturbed)?;

        Ok(relation.eval(value, threshold))
    }

    fn negate(value: bool) -> bool {
        !value
    }
}

/// Evaluation of formulas accounting for the statistical error of distance estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreeValuedSemantics {
    bootstrap: BootstrapConfig,
    seed: Seed,
    parallel: bool,
}

impl ThreeValuedSemantics {
    pub fn new(bootstrap: BootstrapConfig) -> Self {
        Self {
            bootstrap,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Seed::new(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn bootstrap(&self) -> &BootstrapConfig {
        &self.bootstrap
    }

    /// Seed of the generator used by a formula evaluated at the root of an evaluation.
    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn eval(
        &self,
        formula: &RobustnessFormula,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
    ) -> Result<TruthValue, RobustnessError> {
        self.evaluate(formula, sample_size, step, sequence, self.seed)
    }
}

impl Semantics for ThreeValuedSemantics {
    type Value = TruthValue;

    fn parallel(&self) -> bool {
        self.parallel
    }

    #[allow(clippy::too_many_arguments)]
    fn atomic(
        &self,
        perturbation: &Perturbation,
        distance: &DistanceExpression,
        relation: RelationOperator,
        threshold: f64,
        sample_size: usize,
        step: usize,
        sequence: &EvolutionSequence,
        seed: Seed,
    ) -> Result<TruthValue, RobustnessError> {
        let perturbed = sequence.apply(perturbation, step, sample_size)?;
        let mut rng = seed.rng();
        let estimate = distance.eval_ci(&mut rng, step, sequence, &perturbed, &self.bootstrap)?;

        if estimate.lower < threshold && threshold < estimate.upper {
            Ok(TruthValue::Unknown)
        } else {
            Ok(relation.eval(estimate.point, threshold).into())
        }
    }

    fn negate(value: TruthValue) -> TruthValue {
        value.neg()
    }
}
