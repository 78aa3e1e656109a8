//! Controllers: immutable state machines producing the updates a system performs at each step.
//!
//! At every step a [`Controller`] inspects the current [`DataState`] and produces an
//! [`EffectStep`] containing the list of updates to apply and the controller to use at the next
//! step. Controllers never mutate, so a single controller value can be shared by every element of
//! a sample set.
//!
//! | Variant                     | Behavior at one step                                          |
//! |-----------------------------|---------------------------------------------------------------|
//! | `Nil`                       | no updates, stays `Nil`                                       |
//! | `Action`                    | updates of its function, continues as `next`                  |
//! | `Assignment`                | updates of its function followed by those of `next`           |
//! | `IfThenElse`                | behaves as `then` when the guard holds, as `otherwise` if not |
//! | `Parallel`                  | concatenates the updates of both sides, both advance          |
//! | `ProbabilisticInterleaving` | only one side, chosen at random, performs a step              |
//! | `GenerativeChoice`          | behaves as one side chosen at random                          |
//! | `Step`                      | idles for a number of steps before continuing as `next`       |
//! | `Reference`                 | looks up a named controller in a [`ControllerRegistry`]       |
//! | `Registered`                | behaves as its controller and keeps its registry alive        |
//!
//! Recursive controllers are built with a registry. References only hold a weak handle to the
//! registry, so the entry point of a system is obtained with [`ControllerRegistry::controller`],
//! which owns the registry for as long as the controller is in use:
//!
//! ```rust
//! use stark::controller::{Controller, ControllerRegistry};
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::UpdateFunction;
//! use stark::random::Seed;
//!
//! let registry = ControllerRegistry::new();
//! let increment = UpdateFunction::new(|_, s| vec![DataStateUpdate::new(0, s[0] + 1.0)]);
//! registry.set("Inc", Controller::action(increment, registry.reference("Inc")));
//!
//! let mut rng = Seed::new(0).rng();
//! let step = registry.controller("Inc").next(&mut rng, &DataState::new(vec![0.0]));
//!
//! assert_eq!(step.effect(), &[DataStateUpdate::new(0, 1.0)]);
//! ```

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::ds::{DataState, DataStateUpdate};
use crate::functions::{DataStatePredicate, UpdateFunction};
use crate::random::SimRng;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("Illegal probability weight {0}")]
    InvalidProbability(f64),
}

/// Probability weight in the interval `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Probability(f64);

impl Probability {
    pub fn new(value: f64) -> Result<Self, ControllerError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ControllerError::InvalidProbability(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    fn sample(&self, rng: &mut SimRng) -> bool {
        rng.gen::<f64>() <= self.0
    }
}

/// Updates performed at one step together with the state machine for the following step.
#[derive(Debug, Clone)]
pub struct EffectStep<T> {
    effect: Vec<DataStateUpdate>,
    next: T,
}

impl<T> EffectStep<T> {
    pub fn new(effect: Vec<DataStateUpdate>, next: T) -> Self {
        Self { effect, next }
    }

    pub fn effect(&self) -> &[DataStateUpdate] {
        &self.effect
    }

    pub fn next(&self) -> &T {
        &self.next
    }

    pub fn into_parts(self) -> (Vec<DataStateUpdate>, T) {
        (self.effect, self.next)
    }

    fn apply_before(mut self, mut updates: Vec<DataStateUpdate>) -> Self {
        updates.append(&mut self.effect);
        self.effect = updates;
        self
    }
}

#[derive(Clone, Debug)]
pub enum Controller {
    Nil,
    Action {
        updates: UpdateFunction,
        next: Arc<Controller>,
    },
    Assignment {
        updates: UpdateFunction,
        next: Arc<Controller>,
    },
    IfThenElse {
        guard: DataStatePredicate,
        then: Arc<Controller>,
        otherwise: Arc<Controller>,
    },
    Parallel(Arc<Controller>, Arc<Controller>),
    ProbabilisticInterleaving {
        probability: Probability,
        left: Arc<Controller>,
        right: Arc<Controller>,
    },
    GenerativeChoice {
        probability: Probability,
        left: Arc<Controller>,
        right: Arc<Controller>,
    },
    Step {
        ticks: usize,
        next: Arc<Controller>,
    },
    Reference {
        name: String,
        registry: Weak<RwLock<Table>>,
    },
    Registered {
        registry: ControllerRegistry,
        controller: Arc<Controller>,
    },
}

impl Controller {
    pub fn action(updates: UpdateFunction, next: Controller) -> Self {
        Self::Action {
            updates,
            next: Arc::new(next),
        }
    }

    pub fn assignment(updates: UpdateFunction, next: Controller) -> Self {
        Self::Assignment {
            updates,
            next: Arc::new(next),
        }
    }

    pub fn if_then_else(
        guard: DataStatePredicate,
        then: Controller,
        otherwise: Controller,
    ) -> Self {
        Self::IfThenElse {
            guard,
            then: Arc::new(then),
            otherwise: Arc::new(otherwise),
        }
    }

    pub fn parallel(left: Controller, right: Controller) -> Self {
        Self::Parallel(Arc::new(left), Arc::new(right))
    }

    pub fn probabilistic_interleaving(
        p: f64,
        left: Controller,
        right: Controller,
    ) -> Result<Self, ControllerError> {
        Ok(Self::ProbabilisticInterleaving {
            probability: Probability::new(p)?,
            left: Arc::new(left),
            right: Arc::new(right),
        })
    }

    pub fn generative_choice(
        p: f64,
        left: Controller,
        right: Controller,
    ) -> Result<Self, ControllerError> {
        Ok(Self::GenerativeChoice {
            probability: Probability::new(p)?,
            left: Arc::new(left),
            right: Arc::new(right),
        })
    }

    /// Idle for `ticks` steps, then continue as `next`.
    pub fn step(ticks: usize, next: Controller) -> Self {
        Self::Step {
            ticks,
            next: Arc::new(next),
        }
    }

    /// A single step without updates.
    pub fn tick(next: Controller) -> Self {
        Self::action(UpdateFunction::new(|_, _| Vec::new()), next)
    }

    pub fn next(&self, rng: &mut SimRng, state: &DataState) -> EffectStep<Controller> {
        match self {
            Self::Nil => EffectStep::new(Vec::new(), Self::Nil),
            Self::Action { updates, next } => {
                EffectStep::new(updates.apply(rng, state), next.as_ref().clone())
            }
            Self::Assignment { updates, next } => {
                let before = updates.apply(rng, state);
                next.next(rng, state).apply_before(before)
            }
            Self::IfThenElse { guard, then, otherwise } => {
                if guard.eval(rng, state) {
                    then.next(rng, state)
                } else {
                    otherwise.next(rng, state)
                }
            }
            Self::Parallel(left, right) => {
                let (mut effect, left_next) = left.next(rng, state).into_parts();
                let (mut right_effect, right_next) = right.next(rng, state).into_parts();
                effect.append(&mut right_effect);

                EffectStep::new(effect, Self::parallel(left_next, right_next))
            }
            Self::ProbabilisticInterleaving { probability, left, right } => {
                if probability.sample(rng) {
                    let (effect, next) = left.next(rng, state).into_parts();
                    let next = Self::ProbabilisticInterleaving {
                        probability: *probability,
                        left: Arc::new(next),
                        right: Arc::clone(right),
                    };

                    EffectStep::new(effect, next)
                } else {
                    let (effect, next) = right.next(rng, state).into_parts();
                    let next = Self::ProbabilisticInterleaving {
                        probability: *probability,
                        left: Arc::clone(left),
                        right: Arc::new(next),
                    };

                    EffectStep::new(effect, next)
                }
            }
            Self::GenerativeChoice { probability, left, right } => {
                if probability.sample(rng) {
                    left.next(rng, state)
                } else {
                    right.next(rng, state)
                }
            }
            Self::Step { ticks, next } => {
                let next = match ticks {
                    0 => next.as_ref().clone(),
                    n => Self::Step {
                        ticks: n - 1,
                        next: Arc::clone(next),
                    },
                };

                EffectStep::new(Vec::new(), next)
            }
            Self::Reference { name, registry } => match registry.upgrade() {
                Some(controllers) => ControllerRegistry { controllers }.get(name).next(rng, state),
                None => {
                    warn!(name = %name, "controller registry dropped, behaving as nil");
                    EffectStep::new(Vec::new(), Self::Nil)
                }
            },
            Self::Registered { registry, controller } => {
                let (effect, next) = controller.next(rng, state).into_parts();
                EffectStep::new(effect, registry.bind(next))
            }
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::Nil
    }
}

type Table = HashMap<String, Arc<Controller>>;

/// Named, shareable table of controllers used to define recursive behaviors.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: Arc<RwLock<Table>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, controller: Controller) {
        self.controllers.write().insert(name.into(), Arc::new(controller));
    }

    /// Get the controller bound to `name`, or [`Controller::Nil`] if there is none.
    pub fn get(&self, name: &str) -> Arc<Controller> {
        match self.controllers.read().get(name) {
            Some(controller) => Arc::clone(controller),
            None => {
                warn!(name = %name, "undefined controller reference, behaving as nil");
                Arc::new(Controller::Nil)
            }
        }
    }

    /// A controller that resolves `name` each time it performs a step.
    ///
    /// The reference does not keep the registry alive and behaves as [`Controller::Nil`] once
    /// every owner of the registry is dropped. Use it inside the definitions stored in the
    /// registry and [`ControllerRegistry::controller`] for the entry point.
    pub fn reference(&self, name: impl Into<String>) -> Controller {
        Controller::Reference {
            name: name.into(),
            registry: Arc::downgrade(&self.controllers),
        }
    }

    /// Entry point resolving `name`, owning the registry while it is in use.
    pub fn controller(&self, name: impl Into<String>) -> Controller {
        self.bind(self.reference(name))
    }

    fn bind(&self, controller: Controller) -> Controller {
        match controller {
            Controller::Nil => Controller::Nil,
            registered @ Controller::Registered { .. } => registered,
            controller => Controller::Registered {
                registry: self.clone(),
                controller: Arc::new(controller),
            },
        }
    }
}

impl Debug for ControllerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let controllers = self.controllers.read();
        let mut names: Vec<&String> = controllers.keys().collect();
        names.sort();

        f.debug_struct("ControllerRegistry").field("names", &names).finish()
    }
}
