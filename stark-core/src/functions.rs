//! Shareable function objects over data states.
//!
//! Controllers, environments, perturbations and formulas all hold user-provided closures. These
//! wrappers store the closures behind an [`Arc`] so that the immutable structures containing them
//! can be cloned cheaply and shared between threads during parallel evaluation.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::ds::{DataState, DataStateUpdate};
use crate::random::SimRng;

/// Stochastic transformation of a data state.
#[derive(Clone)]
pub struct DataStateFunction(Arc<dyn Fn(&mut SimRng, &DataState) -> DataState + Send + Sync>);

impl DataStateFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut SimRng, &DataState) -> DataState + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|_, state| state.clone())
    }

    /// Create a transformation from a function computing the updates to apply.
    pub fn from_updates(updates: UpdateFunction) -> Self {
        Self::new(move |rng, state| state.apply(&updates.apply(rng, state)))
    }

    pub fn apply(&self, rng: &mut SimRng, state: &DataState) -> DataState {
        (self.0)(rng, state)
    }

    /// Apply `self` and then `next`.
    pub fn and_then(&self, next: &DataStateFunction) -> Self {
        let first = self.clone();
        let second = next.clone();

        Self::new(move |rng, state| {
            let intermediate = first.apply(rng, state);
            second.apply(rng, &intermediate)
        })
    }
}

impl Debug for DataStateFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataStateFunction")
    }
}

/// Deterministic real-valued observation of a data state.
#[derive(Clone)]
pub struct DataStateExpression(Arc<dyn Fn(&DataState) -> f64 + Send + Sync>);

impl DataStateExpression {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&DataState) -> f64 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn constant(value: f64) -> Self {
        Self::new(move |_| value)
    }

    /// Observe a single cell of the state.
    ///
    /// Evaluating the expression on a state without the cell yields NaN.
    pub fn variable(index: usize) -> Self {
        Self::new(move |state| state.get(index).unwrap_or(f64::NAN))
    }

    pub fn eval(&self, state: &DataState) -> f64 {
        (self.0)(state)
    }
}

impl Debug for DataStateExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataStateExpression")
    }
}

/// Stochastic computation of the updates a controller or feedback applies to a state.
#[derive(Clone)]
pub struct UpdateFunction(
    Arc<dyn Fn(&mut SimRng, &DataState) -> Vec<DataStateUpdate> + Send + Sync>,
);

impl UpdateFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut SimRng, &DataState) -> Vec<DataStateUpdate> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, rng: &mut SimRng, state: &DataState) -> Vec<DataStateUpdate> {
        (self.0)(rng, state)
    }
}

impl Debug for UpdateFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("UpdateFunction")
    }
}

/// Stochastic guard over a data state.
#[derive(Clone)]
pub struct DataStatePredicate(Arc<dyn Fn(&mut SimRng, &DataState) -> bool + Send + Sync>);

impl DataStatePredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut SimRng, &DataState) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn eval(&self, rng: &mut SimRng, state: &DataState) -> bool {
        (self.0)(rng, state)
    }
}

impl Debug for DataStatePredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataStatePredicate")
    }
}

#[cfg(test)]
mod tests {
    use crate::ds::{DataState, DataStateUpdate};
    use crate::random::Seed;
    use super::{DataStateExpression, DataStateFunction, UpdateFunction};

    #[test]
    fn composition() {
        let increment = DataStateFunction::from_updates(UpdateFunction::new(|_, s| {
            vec![DataStateUpdate::new(0, s[0] + 1.0)]
        }));
        let double = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] * 2.0)]));

        let mut rng = Seed::new(0).rng();
        let state = DataState::new(vec![3.0]);

        assert_eq!(increment.and_then(&double).apply(&mut rng, &state)[0], 8.0);
        assert_eq!(double.and_then(&increment).apply(&mut rng, &state)[0], 7.0);
        assert_eq!(DataStateFunction::identity().apply(&mut rng, &state), state);
    }

    #[test]
    fn composition_shares_the_generator() {
        use rand::Rng;

        let noise = DataStateFunction::new(|rng, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] + rng.gen::<f64>())])
        });
        let state = DataState::new(vec![0.0]);

        let composed = noise.and_then(&noise).apply(&mut Seed::new(9).rng(), &state);

        let mut rng = Seed::new(9).rng();
        let first = noise.apply(&mut rng, &state);
        let second = noise.apply(&mut rng, &first);

        assert_eq!(composed, second);
        assert_ne!(second[0], 2.0 * first[0]);
    }

    #[test]
    fn expressions() {
        let state = DataState::new(vec![3.0, 4.0]);

        assert_eq!(DataStateExpression::variable(1).eval(&state), 4.0);
        assert!(DataStateExpression::variable(2).eval(&state).is_nan());
        assert_eq!(DataStateExpression::constant(0.5).eval(&state), 0.5);
    }
}
