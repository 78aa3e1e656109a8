//! Simulatable systems.
//!
//! A [`SystemState`] couples a [`DataState`] with the [`Controller`] deciding the updates of the
//! next step and the stochastic environment function applied afterward. A system can optionally
//! carry a [`Feedback`], which modifies the state between the controller and the environment and
//! advances in lock-step with the system. Sampling a system never mutates it: every step produces
//! a new value.
//!
//! A [`PerceivedState`] only holds the data state of a system. Monitors consume sample sets of
//! perceived states since they only need to observe values, never to simulate further.

use crate::combinator::Feedback;
use crate::controller::Controller;
use crate::ds::DataState;
use crate::functions::DataStateFunction;
use crate::random::SimRng;

/// Types exposing a data state that can be observed and replaced.
pub trait Observable: Clone + Send + Sync {
    fn data_state(&self) -> &DataState;

    /// Copy of `self` in which the data state is replaced.
    fn with_data_state(&self, state: DataState) -> Self;
}

#[derive(Clone, Debug)]
pub struct SystemState {
    data: DataState,
    controller: Controller,
    environment: DataStateFunction,
    feedback: Option<Feedback>,
}

impl SystemState {
    pub fn new(controller: Controller, environment: DataStateFunction, data: DataState) -> Self {
        Self {
            data,
            controller,
            environment,
            feedback: None,
        }
    }

    /// Attach a feedback that is applied between the controller and the environment.
    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    /// Perform one step of the system.
    pub fn sample_next(&self, rng: &mut SimRng) -> SystemState {
        let (updates, controller) = self.controller.next(rng, &self.data).into_parts();
        let mut state = self.data.apply(&updates);

        let feedback = self.feedback.as_ref().map(|feedback| {
            if let Some(effect) = feedback.effect() {
                state = effect.apply(rng, &state);
            }

            feedback.step()
        });

        let data = self.environment.apply(rng, &state).with_step(self.data.step() + 1);

        Self {
            data,
            controller,
            environment: self.environment.clone(),
            feedback,
        }
    }

    pub fn perceive(&self) -> PerceivedState {
        PerceivedState::new(self.data.clone())
    }
}

impl Observable for SystemState {
    fn data_state(&self) -> &DataState {
        &self.data
    }

    fn with_data_state(&self, state: DataState) -> Self {
        Self {
            data: state,
            controller: self.controller.clone(),
            environment: self.environment.clone(),
            feedback: self.feedback.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PerceivedState {
    data: DataState,
}

impl PerceivedState {
    pub fn new(data: DataState) -> Self {
        Self { data }
    }
}

impl Observable for PerceivedState {
    fn data_state(&self) -> &DataState {
        &self.data
    }

    fn with_data_state(&self, state: DataState) -> Self {
        Self::new(state)
    }
}

impl From<DataState> for PerceivedState {
    fn from(data: DataState) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use crate::combinator::Feedback;
    use crate::controller::Controller;
    use crate::ds::{DataState, DataStateUpdate};
    use crate::functions::{DataStateFunction, UpdateFunction};
    use crate::random::Seed;
    use super::{Observable, SystemState};

    fn increment(index: usize, amount: f64) -> UpdateFunction {
        UpdateFunction::new(move |_, s| vec![DataStateUpdate::new(index, s[index] + amount)])
    }

    #[test]
    fn controller_then_environment() {
        let controller = Controller::action(increment(0, 1.0), Controller::Nil);
        let environment =
            DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(1, s[0] * 10.0)]));
        let system = SystemState::new(controller, environment, DataState::new(vec![0.0, 0.0]));

        let mut rng = Seed::new(0).rng();
        let next = system.sample_next(&mut rng);

        assert_eq!(next.data_state().values(), &[1.0, 10.0]);
        assert_eq!(next.data_state().step(), 1);
        assert!(matches!(next.controller(), Controller::Nil));

        let after = next.sample_next(&mut rng);
        assert_eq!(after.data_state().values(), &[1.0, 10.0]);
        assert_eq!(after.data_state().step(), 2);
    }

    #[test]
    fn feedback_applies_before_environment() {
        let environment = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(1, s[0])]));
        let feedback = Feedback::atomic(1, DataStateFunction::from_updates(increment(0, 5.0)));
        let system = SystemState::new(Controller::Nil, environment, DataState::new(vec![0.0, 0.0]))
            .with_feedback(feedback);

        let mut rng = Seed::new(0).rng();
        let s1 = system.sample_next(&mut rng);
        let s2 = s1.sample_next(&mut rng);
        let s3 = s2.sample_next(&mut rng);

        assert_eq!(s1.data_state().values(), &[0.0, 0.0]);
        assert_eq!(s2.data_state().values(), &[5.0, 5.0]);
        assert_eq!(s3.data_state().values(), &[5.0, 5.0]);
        assert!(s3.feedback().is_some_and(|f| f.is_done()));
    }
}
