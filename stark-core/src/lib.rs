pub mod combinator;
pub mod controller;
pub mod distance;
pub mod distl;
pub mod ds;
pub mod functions;
pub mod interval;
pub mod monitor;
pub mod random;
pub mod robtl;
pub mod sample;
pub mod sequence;
pub mod system;

pub use crate::combinator::{Feedback, Penalty, Perturbation};
pub use crate::distance::DistanceExpression;
pub use crate::distl::{DisTlFormula, DoubleSemantics};
pub use crate::ds::{DataState, DataStateUpdate, RelationOperator};
pub use crate::monitor::{Monitor, MonitorBuilder};
pub use crate::random::{Seed, SimRng};
pub use crate::robtl::{BooleanSemantics, RobustnessFormula, ThreeValuedSemantics, TruthValue};
pub use crate::sample::SampleSet;
pub use crate::sequence::EvolutionSequence;
pub use crate::system::{PerceivedState, SystemState};
