//! Online monitors for distribution formulas.
//!
//! A [`Monitor`] consumes the sample sets of an evolution one step at a time and reports the value
//! of a [`DisTlFormula`] at a given evaluation step as soon as enough observations are available.
//! The monitor of a formula `f` evaluated at step `s`:
//!
//!   - returns `None` while fewer than `s + f.first_evaluation_step()` observations were consumed,
//!   - returns the value computed on the observations seen so far afterwards,
//!   - returns the last computed value, without further computation, once more than
//!     `s + f.time_horizon()` observations were consumed.
//!
//! When the monitor and the batch semantics share the same seed, the value reported after
//! `s + f.time_horizon()` observations equals the value of
//! [`DoubleSemantics::eval`](crate::distl::DoubleSemantics::eval) at step `s`.
//!
//! ```rust
//! use stark::distl::{DisTlFormula, DistributionPredicate};
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::{DataStateExpression, DataStateFunction};
//! use stark::monitor::MonitorBuilder;
//! use stark::sample::SampleSet;
//! use stark::system::PerceivedState;
//!
//! let halve = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] / 2.0)]));
//! let predicate = DistributionPredicate::function(halve, DataStateExpression::variable(0), 0.5);
//! let formula = DisTlFormula::eventually(DisTlFormula::target(predicate), 0, 2).unwrap();
//! let mut monitor = MonitorBuilder::new(2).build(&formula, 0);
//!
//! for x in [0.2, 0.4, 0.6] {
//!     let sample: SampleSet<PerceivedState> =
//!         (0..3).map(|_| PerceivedState::new(DataState::new(vec![x]))).collect();
//!     let value = monitor.consume(&sample).unwrap();
//!
//!     assert!((value.unwrap() - 0.4).abs() < 1e-9);
//! }
//! ```

use rayon::prelude::*;
use thiserror::Error;
use tracing::{trace, warn};

use crate::distance::until_fold;
use crate::distl::{DisTlFormula, DistributionPredicate};
use crate::interval::Interval;
use crate::random::Seed;
use crate::sample::{SampleError, SampleSet};
use crate::system::PerceivedState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    #[error("Sample error: {0}")]
    SampleError(#[from] SampleError),
}

/// Parameters shared by a monitor and every monitor it creates.
#[derive(Debug, Clone, Copy)]
pub struct MonitorBuilder {
    sample_size: usize,
    seed: Seed,
    parallel: bool,
}

impl MonitorBuilder {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size,
            seed: Seed::default(),
            parallel: false,
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

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Build a monitor of `formula` evaluated at `evaluation_step`.
    pub fn build(&self, formula: &DisTlFormula, evaluation_step: usize) -> Monitor {
        self.build_at(formula, evaluation_step, 0, self.seed)
    }

    /// Build a monitor whose first observation is the sample set of step `base`.
    ///
    /// Operands are seeded from `seed` and their position, as in
    /// [`DoubleSemantics`](crate::distl::DoubleSemantics).
    fn build_at(
        &self,
        formula: &DisTlFormula,
        evaluation_step: usize,
        base: usize,
        seed: Seed,
    ) -> Monitor {
        let node = match formula {
            DisTlFormula::True => Node::Constant(1.0),
            DisTlFormula::False => Node::Constant(-1.0),
            DisTlFormula::Target(predicate) => Node::Predicate {
                predicate: predicate.clone(),
                polarity: Polarity::Target,
                result: None,
            },
            DisTlFormula::Brink(predicate) => Node::Predicate {
                predicate: predicate.clone(),
                polarity: Polarity::Brink,
                result: None,
            },
            DisTlFormula::Negation(argument) => {
                let argument = self.build_at(argument, evaluation_step, base, seed.fork(0));
                Node::Negation(Box::new(argument))
            }
            DisTlFormula::Conjunction(left, right) => {
                self.binary(Connective::Conjunction, left, right, evaluation_step, base, seed)
            }
            DisTlFormula::Disjunction(left, right) => {
                self.binary(Connective::Disjunction, left, right, evaluation_step, base, seed)
            }
            DisTlFormula::Implication(left, right) => {
                self.binary(Connective::Implication, left, right, evaluation_step, base, seed)
            }
            DisTlFormula::Always { argument, interval } => {
                let right = Operand::new(argument, seed.fork(0));
                let window = Window::new(formula, Fold::Always, None, right, Some(*interval));

                Node::Window(Box::new(window))
            }
            DisTlFormula::Eventually { argument, interval } => {
                let right = Operand::new(argument, seed.fork(0));
                let window = Window::new(formula, Fold::Eventually, None, right, Some(*interval));

                Node::Window(Box::new(window))
            }
            DisTlFormula::Until { left, interval, right } => {
                let left = Operand::new(left, seed.fork(0));
                let right = Operand::new(right, seed.fork(1));
                let window = Window::new(formula, Fold::Until, Some(left), right, Some(*interval));

                Node::Window(Box::new(window))
            }
            DisTlFormula::UnboundedUntil { left, right } => {
                let left = Operand::new(left, seed.fork(0));
                let right = Operand::new(right, seed.fork(1));

                Node::Window(Box::new(Window::new(formula, Fold::Until, Some(left), right, None)))
            }
        };

        Monitor {
            builder: *self,
            seed,
            evaluation_step,
            base,
            observations: 0,
            node,
        }
    }

    fn binary(
        &self,
        connective: Connective,
        left: &DisTlFormula,
        right: &DisTlFormula,
        evaluation_step: usize,
        base: usize,
        seed: Seed,
    ) -> Node {
        Node::Binary {
            connective,
            left: Box::new(self.build_at(left, evaluation_step, base, seed.fork(0))),
            right: Box::new(self.build_at(right, evaluation_step, base, seed.fork(1))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Polarity {
    Target,
    Brink,
}

#[derive(Debug, Clone, Copy)]
enum Connective {
    Conjunction,
    Disjunction,
    Implication,
}

impl Connective {
    fn combine(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Conjunction => left.min(right),
            Self::Disjunction => left.max(right),
            Self::Implication => (-left).max(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    Always,
    Eventually,
    Until,
}

/// Operand of a temporal operator together with the seed of its monitors.
#[derive(Debug, Clone)]
struct Operand {
    formula: DisTlFormula,
    seed: Seed,
}

impl Operand {
    fn new(formula: &DisTlFormula, seed: Seed) -> Self {
        Self {
            formula: formula.clone(),
            seed,
        }
    }

    fn monitor(&self, builder: &MonitorBuilder, base: usize) -> Monitor {
        builder.build_at(&self.formula, 0, base, self.seed)
    }
}

/// Sub-monitors of a temporal operator, one per admissible step of its interval.
///
/// The `i`-th right (and left) monitor observes the evolution from the `i`-th step of the interval.
#[derive(Debug, Clone)]
struct Window {
    fold: Fold,
    left: Option<Operand>,
    right: Operand,
    from: usize,
    span: Option<usize>,
    first_evaluation_step: usize,
    time_horizon: Option<usize>,
    lefts: Vec<Monitor>,
    rights: Vec<Monitor>,
    left_values: Vec<Option<f64>>,
    right_values: Vec<Option<f64>>,
    result: Option<f64>,
}

/// Feed `sample` to every monitor, returning their outputs in order.
fn feed(
    monitors: &mut [Monitor],
    sample: &SampleSet<PerceivedState>,
    parallel: bool,
) -> Result<Vec<Option<f64>>, MonitorError> {
    if parallel {
        monitors.par_iter_mut().map(|monitor| monitor.consume(sample)).collect()
    } else {
        monitors.iter_mut().map(|monitor| monitor.consume(sample)).collect()
    }
}

/// Values of the leading monitors that already produced an output.
fn available(values: &[Option<f64>], limit: usize) -> Vec<f64> {
    values.iter().take(limit).map_while(|value| *value).collect()
}

impl Window {
    fn new(
        formula: &DisTlFormula,
        fold: Fold,
        left: Option<Operand>,
        right: Operand,
        interval: Option<Interval>,
    ) -> Self {
        Self {
            fold,
            left,
            right,
            from: interval.map_or(0, |interval| interval.from()),
            span: interval.map(|interval| interval.to() - interval.from()),
            first_evaluation_step: formula.first_evaluation_step(),
            time_horizon: formula.time_horizon(),
            lefts: Vec::new(),
            rights: Vec::new(),
            left_values: Vec::new(),
            right_values: Vec::new(),
            result: None,
        }
    }

    fn consume(
        &mut self,
        builder: MonitorBuilder,
        base: usize,
        evaluation_step: usize,
        observations: usize,
        sample: &SampleSet<PerceivedState>,
    ) -> Result<Option<f64>, MonitorError> {
        if let Some(horizon) = self.time_horizon {
            if observations > evaluation_step.saturating_add(horizon) {
                if self.result.is_none() {
                    warn!(observations, horizon, "window monitor has no value at its horizon");
                }

                return Ok(self.result);
            }
        }

        if observations > evaluation_step + self.from {
            let anchor = base + observations - 1;

            if self.span.map_or(true, |span| self.rights.len() <= span) {
                self.rights.push(self.right.monitor(&builder, anchor));
            }

            if let Some(left) = &self.left {
                if self.span.map_or(true, |span| self.lefts.len() < span) {
                    self.lefts.push(left.monitor(&builder, anchor));
                }
            }

            if builder.parallel {
                let (lefts, rights) = rayon::join(
                    || feed(&mut self.lefts, sample, true),
                    || feed(&mut self.rights, sample, true),
                );
                self.left_values = lefts?;
                self.right_values = rights?;
            } else {
                self.left_values = feed(&mut self.lefts, sample, false)?;
                self.right_values = feed(&mut self.rights, sample, false)?;
            }
        }

        if observations < evaluation_step.saturating_add(self.first_evaluation_step) {
            return Ok(None);
        }

        let value = self.fold();
        trace!(observations, ?value, "window monitor value");

        if value.is_some() {
            self.result = value;
        }

        Ok(self.result)
    }

    fn fold(&self) -> Option<f64> {
        let limit = self.span.map_or(usize::MAX, |span| span.saturating_add(1));
        let rights = available(&self.right_values, limit);

        match self.fold {
            Fold::Always => rights.into_iter().reduce(f64::min),
            Fold::Eventually => rights.into_iter().reduce(f64::max),
            Fold::Until => {
                let lefts = available(&self.left_values, limit);
                let length = rights.len().min(lefts.len() + 1);

                let lefts = &lefts[..length.saturating_sub(1)];
                until_fold(lefts, &rights[..length], f64::min, f64::max)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Constant(f64),
    Predicate {
        predicate: DistributionPredicate,
        polarity: Polarity,
        result: Option<f64>,
    },
    Negation(Box<Monitor>),
    Binary {
        connective: Connective,
        left: Box<Monitor>,
        right: Box<Monitor>,
    },
    Window(Box<Window>),
}

/// Stateful monitor of a distribution formula, see the [module documentation](self).
#[derive(Debug, Clone)]
pub struct Monitor {
    builder: MonitorBuilder,
    seed: Seed,
    evaluation_step: usize,
    base: usize,
    observations: usize,
    node: Node,
}

impl Monitor {
    /// Number of sample sets consumed so far.
    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn evaluation_step(&self) -> usize {
        self.evaluation_step
    }

    /// Consume the sample set of the next step and report the current value of the formula.
    pub fn consume(
        &mut self,
        sample: &SampleSet<PerceivedState>,
    ) -> Result<Option<f64>, MonitorError> {
        self.observations += 1;

        let observations = self.observations;
        let evaluation_step = self.evaluation_step;
        let builder = self.builder;

        match &mut self.node {
            Node::Constant(value) => Ok((observations >= evaluation_step).then_some(*value)),
            Node::Predicate { predicate, polarity, result } => {
                if observations == evaluation_step + 1 {
                    let step = self.base + evaluation_step;
                    let mut rng = self.seed.fork(step as u64).rng();
                    let size = builder.sample_size;
                    let value = match polarity {
                        Polarity::Target => predicate.target(&mut rng, sample, size, step)?,
                        Polarity::Brink => predicate.brink(&mut rng, sample, size, step)?,
                    };

                    *result = Some(value);
                } else if observations > evaluation_step + 1 && result.is_none() {
                    warn!(observations, "predicate monitor has no value to report");
                }

                Ok(*result)
            }
            Node::Negation(argument) => Ok(argument.consume(sample)?.map(|value| -value)),
            Node::Binary { connective, left, right } => {
                let (l, r) = if builder.parallel {
                    let (l, r) = rayon::join(|| left.consume(sample), || right.consume(sample));
                    (l?, r?)
                } else {
                    (left.consume(sample)?, right.consume(sample)?)
                };

                Ok(l.zip(r).map(|(l, r)| connective.combine(l, r)))
            }
            Node::Window(window) => {
                window.consume(builder, self.base, evaluation_step, observations, sample)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::Rng;

    use crate::combinator::Penalty;
    use crate::controller::Controller;
    use crate::distl::{DisTlFormula, DistributionPredicate, DoubleSemantics};
    use crate::ds::{DataState, DataStateUpdate};
    use crate::functions::{DataStateExpression, DataStateFunction};
    use crate::sequence::EvolutionSequence;
    use crate::system::SystemState;
    use super::MonitorBuilder;

    const EPSILON: f64 = 1e-9;
    const SAMPLE_SIZE: usize = 3;
    const SEED: u64 = 21;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn growing() -> EvolutionSequence {
        let environment =
            DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 0.1)]));

        EvolutionSequence::new(
            0,
            move |_| {
                SystemState::new(Controller::Nil, environment.clone(), DataState::new(vec![0.0]))
            },
            4,
        )
    }

    fn noisy() -> EvolutionSequence {
        let environment = DataStateFunction::new(|rng, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] + rng.gen::<f64>() * 0.2)])
        });

        EvolutionSequence::new(
            4,
            move |rng| {
                let initial = DataState::new(vec![rng.gen::<f64>() * 0.1]);
                SystemState::new(Controller::Nil, environment.clone(), initial)
            },
            6,
        )
    }

    fn x() -> DataStateExpression {
        DataStateExpression::variable(0)
    }

    /// Target formula whose value at step `t` of [`growing`] is `0.2 - 0.05 * t`.
    fn target() -> DisTlFormula {
        let halve = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] / 2.0)]));
        DisTlFormula::target(DistributionPredicate::function(halve, x(), 0.2))
    }

    fn noisy_predicate(threshold: f64) -> DistributionPredicate {
        let jitter = DataStateFunction::new(|rng, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] + rng.gen::<f64>() * 0.2 - 0.1)])
        });
        DistributionPredicate::function(jitter, x(), threshold)
    }

    /// Feed the monitor of `formula` until its time horizon and compare the last value with the
    /// batch semantics.
    fn assert_matches_batch(
        formula: &DisTlFormula,
        evaluation_step: usize,
        sequence: &EvolutionSequence,
        parallel: bool,
    ) -> TestResult {
        let builder = MonitorBuilder::new(SAMPLE_SIZE).with_seed(SEED).with_parallel(parallel);
        let mut monitor = builder.build(formula, evaluation_step);
        let horizon = formula.time_horizon().unwrap_or(0);
        let mut last = None;

        for step in 0..evaluation_step + horizon {
            last = monitor.consume(&sequence.perceived(step))?;
        }

        let expected = DoubleSemantics::new()
            .with_seed(SEED)
            .eval(formula, SAMPLE_SIZE, evaluation_step, sequence)?;

        assert_relative_eq!(last.unwrap_or(f64::NAN), expected, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn predicate_monitors() -> TestResult {
        let sequence = growing();
        let mut now = MonitorBuilder::new(SAMPLE_SIZE).build(&target(), 0);
        let mut later = MonitorBuilder::new(SAMPLE_SIZE).build(&target(), 1);

        let now_value = now.consume(&sequence.perceived(0))?;
        assert_relative_eq!(now_value.unwrap_or(f64::NAN), 0.2, epsilon = EPSILON);
        assert_eq!(later.consume(&sequence.perceived(0))?, None);

        for step in 1..3 {
            let value = later.consume(&sequence.perceived(step))?;
            assert_relative_eq!(value.unwrap_or(f64::NAN), 0.15, epsilon = EPSILON);
        }

        assert_eq!(later.observations(), 3);

        let target = DisTlFormula::target(noisy_predicate(0.1));
        let brink = DisTlFormula::brink(noisy_predicate(0.02));

        for step in 0..2 {
            assert_matches_batch(&target, step, &noisy(), false)?;
            assert_matches_batch(&brink, step, &noisy(), false)?;
        }

        Ok(())
    }

    #[test]
    fn no_value_before_first_evaluation_step() -> TestResult {
        let sequence = growing();
        let formula = DisTlFormula::always(target(), 2, 3)?;
        let mut monitor = MonitorBuilder::new(SAMPLE_SIZE).build(&formula, 1);

        for step in 0..3 {
            assert_eq!(monitor.consume(&sequence.perceived(step))?, None);
        }

        let value = monitor.consume(&sequence.perceived(3))?;
        assert_relative_eq!(value.unwrap_or(f64::NAN), 0.05, epsilon = EPSILON);

        let value = monitor.consume(&sequence.perceived(4))?;
        assert_relative_eq!(value.unwrap_or(f64::NAN), 0.0, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn values_are_final_after_time_horizon() -> TestResult {
        let sequence = growing();
        let formula = DisTlFormula::eventually(DisTlFormula::negation(target()), 0, 2)?;
        let mut monitor = MonitorBuilder::new(SAMPLE_SIZE).build(&formula, 0);
        let mut values = Vec::new();

        for step in 0..6 {
            values.push(monitor.consume(&sequence.perceived(step))?.unwrap_or(f64::NAN));
        }

        assert_relative_eq!(values[0], -0.2, epsilon = EPSILON);
        assert_relative_eq!(values[1], -0.15, epsilon = EPSILON);
        assert_relative_eq!(values[2], -0.1, epsilon = EPSILON);
        assert_relative_eq!(values[5], -0.1, epsilon = EPSILON);
        Ok(())
    }

    #[test]
    fn window_monitors_match_batch() -> TestResult {
        let sequence = noisy();
        let target = || DisTlFormula::target(noisy_predicate(0.05));
        let brink = || DisTlFormula::brink(noisy_predicate(0.01));

        let formulas = vec![
            DisTlFormula::always(target(), 0, 2)?,
            DisTlFormula::eventually(brink(), 1, 3)?,
            DisTlFormula::until(target(), 0, 3, brink())?,
            DisTlFormula::until(DisTlFormula::True, 1, 2, DisTlFormula::negation(target()))?,
            DisTlFormula::conjunction(target(), DisTlFormula::eventually(brink(), 0, 2)?),
            DisTlFormula::implication(brink(), DisTlFormula::False),
            DisTlFormula::conjunction(brink(), brink()),
            DisTlFormula::always(DisTlFormula::disjunction(target(), target()), 0, 2)?,
        ];

        for formula in &formulas {
            for step in 0..2 {
                assert_matches_batch(formula, step, &sequence, false)?;
            }
        }

        Ok(())
    }

    #[test]
    fn nested_monitors_match_batch() -> TestResult {
        let sequence = noisy();
        let target = || DisTlFormula::target(noisy_predicate(0.05));
        let penalty = Penalty::persistent(Penalty::atomic(0, x()));
        let shrink = DataStateFunction::new(|rng, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] * rng.gen::<f64>())])
        });
        let scored = DisTlFormula::brink(DistributionPredicate::function(shrink, penalty, 0.0));

        let nested = DisTlFormula::until(
            DisTlFormula::always(target(), 0, 1)?,
            1,
            3,
            DisTlFormula::disjunction(DisTlFormula::eventually(scored, 0, 2)?, target()),
        )?;

        assert_matches_batch(&nested, 0, &sequence, false)?;
        assert_matches_batch(&nested, 1, &sequence, true)?;
        Ok(())
    }

    #[test]
    fn unbounded_until_tracks_observations() -> TestResult {
        let sequence = growing();
        let formula =
            DisTlFormula::unbounded_until(DisTlFormula::True, DisTlFormula::negation(target()));
        let mut monitor = MonitorBuilder::new(SAMPLE_SIZE).with_parallel(true).build(&formula, 0);

        for step in 0..4 {
            let value = monitor.consume(&sequence.perceived(step))?.unwrap_or(f64::NAN);
            assert_relative_eq!(value, -0.2 + 0.05 * step as f64, epsilon = EPSILON);
        }

        Ok(())
    }
}
