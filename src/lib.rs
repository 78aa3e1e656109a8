//! Statistical analysis of the robustness of stochastic controlled systems.
//!
//! A system is modeled as a [`DataState`] of numeric values evolving in discrete steps. At every
//! step a [`Controller`](controller::Controller) decides which updates to perform, and a
//! stochastic environment function produces the state of the next step. Since the behavior of a
//! system is random, it is studied through an [`EvolutionSequence`]: a sequence of
//! [`SampleSet`]s in which the `i`-th set contains the states reached by independent simulations
//! after `i` steps.
//!
//! The robustness of a system is the ability to keep behaving as expected when its evolution is
//! disturbed. A [`Perturbation`] describes when and how the states of a system are modified, and
//! applying it to an evolution sequence produces the perturbed evolution. The difference between
//! the two evolutions is measured with [`DistanceExpression`]s, which compare sample sets at single
//! steps or summarize their distance over time windows. Requirements are expressed in two logics:
//!
//!   - [`RobustnessFormula`]s combine bounds on the distance caused by perturbations with the usual
//!     logical connectives and bounded temporal operators. They can be evaluated with an exact
//!     [`BooleanSemantics`] or with a [`ThreeValuedSemantics`] accounting for the statistical error
//!     of the distance estimates.
//!   - [`DisTlFormula`]s compare the distribution of the states of the system with reference
//!     distributions. They have a quantitative semantics in which the sign of the value tells
//!     whether the formula is satisfied and its magnitude how robustly. DisTL formulas can also be
//!     evaluated online with a [`Monitor`], consuming the sample sets of an evolution one step at a
//!     time.
//!
//! # Examples
//!
//! An evolution sequence is created from a generator of initial states and the number of
//! simulations to run. Sample sets are computed on demand and cached:
//!
//! ```rust
//! use rand::Rng;
//!
//! use stark::controller::Controller;
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::{DataStateExpression, DataStateFunction};
//! use stark::sequence::EvolutionSequence;
//! use stark::system::SystemState;
//!
//! // The value of the only variable drifts by a random amount in [0, 0.1) at every step
//! let environment = DataStateFunction::new(|rng, s| {
//!     s.apply(&[DataStateUpdate::new(0, s[0] + rng.gen::<f64>() * 0.1)])
//! });
//!
//! let sequence = EvolutionSequence::new(
//!     42,
//!     move |_| SystemState::new(Controller::Nil, environment.clone(), DataState::new(vec![0.0])),
//!     100,
//! );
//!
//! let mean = sequence.get(10).mean(&DataStateExpression::variable(0));
//! assert!(0.0 < mean && mean < 1.0);
//! ```
//!
//! A robustness formula states how far a perturbation is allowed to move the system. The formula
//! below requires that shifting the variable at the evaluation step keeps the perturbed evolution
//! within `0.1` of the nominal one over the following five steps:
//!
//! ```rust
//! use stark::controller::Controller;
//! use stark::distance::DistanceExpression;
//! use stark::ds::{DataState, DataStateUpdate, RelationOperator};
//! use stark::functions::{DataStateExpression, DataStateFunction};
//! use stark::combinator::Perturbation;
//! use stark::robtl::{BooleanSemantics, RobustnessFormula, ThreeValuedSemantics, TruthValue};
//! use stark::sample::BootstrapConfig;
//! use stark::sequence::EvolutionSequence;
//! use stark::system::SystemState;
//!
//! let environment =
//!     DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 0.1)]));
//! let sequence = EvolutionSequence::new(
//!     0,
//!     move |_| SystemState::new(Controller::Nil, environment.clone(), DataState::new(vec![0.0])),
//!     10,
//! );
//!
//! let shift = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 0.05)]));
//! let drift = DistanceExpression::max_interval(
//!     DistanceExpression::atomic_leq(DataStateExpression::variable(0)),
//!     0,
//!     5,
//! ).unwrap();
//!
//! let formula = RobustnessFormula::atomic(
//!     Perturbation::atomic(0, shift),
//!     drift,
//!     RelationOperator::LessThan,
//!     0.1,
//! );
//!
//! assert!(BooleanSemantics::new().eval(&formula, 5, 0, &sequence).unwrap());
//!
//! let semantics = ThreeValuedSemantics::new(BootstrapConfig::default()).with_seed(7);
//! assert_eq!(semantics.eval(&formula, 5, 0, &sequence).unwrap(), TruthValue::True);
//! ```
//!
//! Distribution formulas are evaluated either on a whole evolution sequence, or online by feeding
//! the sample sets of each step to a monitor. Both produce the same value once the monitor has
//! consumed enough steps:
//!
//! ```rust
//! use stark::controller::Controller;
//! use stark::distl::{DisTlFormula, DistributionPredicate, DoubleSemantics};
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::{DataStateExpression, DataStateFunction};
//! use stark::monitor::MonitorBuilder;
//! use stark::sequence::EvolutionSequence;
//! use stark::system::SystemState;
//!
//! let environment =
//!     DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 0.1)]));
//! let sequence = EvolutionSequence::new(
//!     0,
//!     move |_| SystemState::new(Controller::Nil, environment.clone(), DataState::new(vec![0.0])),
//!     10,
//! );
//!
//! // The distribution should stay within 0.2 of the one obtained by halving every value
//! let halve = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] / 2.0)]));
//! let predicate = DistributionPredicate::function(halve, DataStateExpression::variable(0), 0.2);
//! let formula = DisTlFormula::always(DisTlFormula::target(predicate), 0, 3).unwrap();
//!
//! let batch = DoubleSemantics::new().eval(&formula, 4, 0, &sequence).unwrap();
//!
//! let mut monitor = MonitorBuilder::new(4).build(&formula, 0);
//! let mut online = None;
//!
//! for step in 0..formula.time_horizon().unwrap() {
//!     online = monitor.consume(&sequence.perceived(step)).unwrap();
//! }
//!
//! assert_eq!(online, Some(batch));
//! assert!(batch > 0.0);
//! ```

extern crate stark_core as core;

#[doc(inline)]
pub use core::{
    combinator, controller, distance, distl, ds, functions, interval, monitor, random, robtl,
    sample, sequence, system,
};

#[doc(inline)]
pub use core::combinator::{Feedback, Penalty, Perturbation};

#[doc(inline)]
pub use core::distance::DistanceExpression;

#[doc(inline)]
pub use core::distl::{DisTlFormula, DoubleSemantics};

#[doc(inline)]
pub use core::ds::{DataState, DataStateUpdate, RelationOperator};

#[doc(inline)]
pub use core::monitor::{Monitor, MonitorBuilder};

#[doc(inline)]
pub use core::robtl::{BooleanSemantics, RobustnessFormula, ThreeValuedSemantics, TruthValue};

#[doc(inline)]
pub use core::sample::SampleSet;

#[doc(inline)]
pub use core::sequence::EvolutionSequence;

#[doc(inline)]
pub use core::system::{PerceivedState, SystemState};
