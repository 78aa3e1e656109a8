//! Temporal combinators describing when an effect takes place.
//!
//! Perturbations, feedbacks and penalties share the same structure: a small immutable state
//! machine that, at the current step, exposes an optional effect and the combinator to use at the
//! next step. The time remaining before an effect is encoded in the combinator itself, so a single
//! value can be shared by every element of a sample set and by parallel evaluations.
//!
//! | Variant              | Effect now         | Next step                          | Done      |
//! |----------------------|--------------------|------------------------------------|-----------|
//! | `None`               | none               | `None`                             | yes       |
//! | `Atomic(k, e)`       | `e` if `k = 0`     | `Atomic(k-1, e)`, `None` after `e` | no        |
//! | `Sequential(a, b)`   | `a`'s, then `b`'s  | steps `a`, then `b`                | both done |
//! | `Iterative(n, body)` | `body`'s           | `body` then `Iterative(n-1, body)` | `n = 0`   |
//! | `After(k, body)`     | none               | `After(k-1, body)`, then `body`    | no        |
//! | `Persistent(body)`   | the running copy's | restarts `body` once done          | no        |
//!
//! A `Sequential` switches to its second combinator as soon as the first one is done.
//!
//! The effect type depends on the family: [`Perturbation`]s and [`Feedback`]s transform data
//! states, while [`Penalty`] combinators produce scoring functions.
//!
//! ```rust
//! use stark::combinator::Perturbation;
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::DataStateFunction;
//!
//! let shift = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 10.0)]));
//! let perturbation = Perturbation::atomic(2, shift);
//!
//! assert!(perturbation.effect().is_none());
//! assert!(perturbation.step().effect().is_none());
//! assert!(perturbation.step().step().effect().is_some());
//! assert!(perturbation.step().step().step().is_done());
//! ```

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::ds::{DataState, DataStateUpdate};
use crate::functions::{DataStateExpression, DataStateFunction};
use crate::random::SimRng;
use crate::sequence::EvolutionSequence;
use crate::system::Observable;

#[derive(Clone, Debug)]
pub enum Combinator<E> {
    None,
    Atomic {
        after: usize,
        effect: E,
    },
    Sequential(Arc<Combinator<E>>, Arc<Combinator<E>>),
    Iterative {
        replica: usize,
        body: Arc<Combinator<E>>,
    },
    After {
        steps: usize,
        body: Arc<Combinator<E>>,
    },
    Persistent {
        body: Arc<Combinator<E>>,
        current: Arc<Combinator<E>>,
    },
}

/// Modification of the state of a system at selected steps.
pub type Perturbation = Combinator<DataStateFunction>;

/// Modification applied by a system to itself at selected steps.
pub type Feedback = Combinator<DataStateFunction>;

/// Scoring function selected according to the current step.
pub type Penalty = Combinator<DataStateExpression>;

impl<E> Combinator<E> {
    pub fn none() -> Self {
        Self::None
    }

    /// Apply `effect` once, after `after` steps.
    pub fn atomic(after: usize, effect: E) -> Self {
        Self::Atomic { after, effect }
    }

    pub fn sequential(first: Self, second: Self) -> Self {
        Self::Sequential(Arc::new(first), Arc::new(second))
    }

    /// Run `body` to completion `replica` times.
    pub fn iterative(replica: usize, body: Self) -> Self {
        Self::Iterative {
            replica,
            body: Arc::new(body),
        }
    }

    /// Wait `steps` steps, then behave as `body`.
    pub fn after(steps: usize, body: Self) -> Self {
        Self::After {
            steps,
            body: Arc::new(body),
        }
    }

    /// Repeat `body` forever.
    pub fn persistent(body: Self) -> Self {
        let body = Arc::new(body);

        Self::Persistent {
            current: Arc::clone(&body),
            body,
        }
    }

    /// The effect taking place at the current step, if any.
    pub fn effect(&self) -> Option<&E> {
        match self {
            Self::None => None,
            Self::Atomic { after: 0, effect } => Some(effect),
            Self::Atomic { .. } => None,
            Self::Sequential(first, second) => {
                if first.is_done() {
                    second.effect()
                } else {
                    first.effect()
                }
            }
            Self::Iterative { replica: 0, .. } => None,
            Self::Iterative { body, .. } => body.effect(),
            Self::After { .. } => None,
            Self::Persistent { current, .. } => current.effect(),
        }
    }

    /// Whether no effect can take place at this step or any later one.
    pub fn is_done(&self) -> bool {
        match self {
            Self::None => true,
            Self::Atomic { .. } => false,
            Self::Sequential(first, second) => first.is_done() && second.is_done(),
            Self::Iterative { replica, .. } => *replica == 0,
            Self::After { .. } => false,
            Self::Persistent { .. } => false,
        }
    }
}

impl<E> Combinator<E>
where
    E: Clone,
{
    /// The combinator to use at the next step.
    pub fn step(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Atomic { after: 0, .. } => Self::None,
            Self::Atomic { after, effect } => Self::Atomic {
                after: after - 1,
                effect: effect.clone(),
            },
            Self::Sequential(first, second) => {
                if first.is_done() {
                    second.step()
                } else {
                    Self::Sequential(Arc::new(first.step()), Arc::clone(second))
                }
            }
            Self::Iterative { replica: 0, .. } => Self::None,
            Self::Iterative { replica, body } => {
                let rest = Self::Iterative {
                    replica: replica - 1,
                    body: Arc::clone(body),
                };

                Self::Sequential(Arc::new(body.step()), Arc::new(rest))
            }
            Self::After { steps, body } if *steps > 1 => Self::After {
                steps: steps - 1,
                body: Arc::clone(body),
            },
            Self::After { body, .. } => body.as_ref().clone(),
            Self::Persistent { body, current } => {
                let next = current.step();
                let current = if next.is_done() {
                    Arc::clone(body)
                } else {
                    Arc::new(next)
                };

                Self::Persistent {
                    body: Arc::clone(body),
                    current,
                }
            }
        }
    }

    /// Effects of the first `steps` steps, in order.
    pub fn effects(&self, steps: usize) -> Vec<Option<E>> {
        let mut current = self.clone();
        let mut effects = Vec::with_capacity(steps);

        for _ in 0..steps {
            effects.push(current.effect().cloned());
            current = current.step();
        }

        effects
    }
}

impl Combinator<DataStateFunction> {
    /// Apply the current effect, if any, to an observable state.
    pub fn apply<T>(&self, rng: &mut SimRng, state: &T) -> T
    where
        T: Observable,
    {
        match self.effect() {
            Some(effect) => state.with_data_state(effect.apply(rng, state.data_state())),
            None => state.clone(),
        }
    }

    /// Atomic feedback computing its updates from a reference evolution sequence.
    pub fn observing(
        after: usize,
        sequence: Arc<EvolutionSequence>,
        function: FeedbackFunction,
    ) -> Self {
        let effect = DataStateFunction::new(move |rng, state| {
            state.apply(&function.apply(rng, state, &sequence))
        });
        Self::atomic(after, effect)
    }
}

/// Computation of feedback updates from the current state and a reference evolution sequence.
#[derive(Clone)]
pub struct FeedbackFunction(
    Arc<dyn Fn(&mut SimRng, &DataState, &EvolutionSequence) -> Vec<DataStateUpdate> + Send + Sync>,
);

impl FeedbackFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut SimRng, &DataState, &EvolutionSequence) -> Vec<DataStateUpdate>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(
        &self,
        rng: &mut SimRng,
        state: &DataState,
        sequence: &EvolutionSequence,
    ) -> Vec<DataStateUpdate> {
        (self.0)(rng, state, sequence)
    }
}

impl Debug for FeedbackFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("FeedbackFunction")
    }
}

impl Combinator<DataStateExpression> {
    /// The current scoring function, or the constant zero function if there is none.
    pub fn effect_or_zero(&self) -> DataStateExpression {
        self.effect()
            .cloned()
            .unwrap_or_else(|| DataStateExpression::constant(0.0))
    }

    /// Scoring functions of the steps `0..=step`.
    pub fn effect_up_to(&self, step: usize) -> Vec<DataStateExpression> {
        let mut current = self.clone();
        let mut effects = Vec::with_capacity(step + 1);

        for _ in 0..step {
            effects.push(current.effect_or_zero());
            current = current.step();
        }

        effects.push(current.effect_or_zero());
        effects
    }

    /// The scoring function used at `step`.
    pub fn effect_at(&self, step: usize) -> DataStateExpression {
        let mut current = self.clone();

        for _ in 0..step {
            if current.is_done() {
                break;
            }

            current = current.step();
        }

        current.effect_or_zero()
    }

    /// Scoring functions of every step until the penalty is done, at most `limit` of them.
    ///
    /// Persistent penalties are never done and always produce `limit` functions.
    pub fn total_effect(&self, limit: usize) -> Vec<DataStateExpression> {
        let mut current = self.clone();
        let mut effects = Vec::new();

        while !current.is_done() && effects.len() < limit {
            effects.push(current.effect_or_zero());
            current = current.step();
        }

        effects
    }

    /// Score a state with the function selected for `step`.
    pub fn apply(&self, state: &DataState, step: usize) -> f64 {
        self.effect_at(step).eval(state)
    }
}
