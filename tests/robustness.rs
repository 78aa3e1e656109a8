use std::error::Error;

use approx::assert_relative_eq;
use rand::Rng;

use stark::controller::Controller;
use stark::distl::DistributionPredicate;
use stark::ds::DataRange;
use stark::functions::{DataStateExpression, DataStateFunction};
use stark::{
    BooleanSemantics, DataState, DataStateUpdate, DisTlFormula, DistanceExpression,
    DoubleSemantics, EvolutionSequence, MonitorBuilder, Perturbation, RelationOperator,
    RobustnessFormula, SystemState,
};

const EPSILON: f64 = 1.0e-9;

/// Vehicle keeping its speed close to 1 despite random accelerations.
fn vehicle(seed: u64) -> Result<EvolutionSequence, Box<dyn Error>> {
    let initial = DataState::with_ranges(vec![DataRange::new(0.0, 2.0)?], vec![1.0])?;
    let environment = DataStateFunction::new(|rng, s| {
        let acceleration = rng.gen::<f64>() * 0.1 - 0.05;
        s.apply(&[DataStateUpdate::new(0, s[0] + 0.5 * (1.0 - s[0]) + acceleration)])
    });

    Ok(EvolutionSequence::new(
        seed,
        move |_| SystemState::new(Controller::Nil, environment.clone(), initial.clone()),
        30,
    ))
}

fn speed() -> DataStateExpression {
    DataStateExpression::new(|s| s[0] / 2.0)
}

#[test]
fn recovery_after_braking() -> Result<(), Box<dyn Error>> {
    let sequence = vehicle(1)?;
    let brake = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] - 0.6)]));

    let immediate = DistanceExpression::atomic_geq(speed());
    let later = DistanceExpression::max_interval(DistanceExpression::atomic_geq(speed()), 6, 8)?;

    let perturbed_now = RobustnessFormula::atomic(
        Perturbation::atomic(0, brake.clone()),
        immediate,
        RelationOperator::GreaterThan,
        0.2,
    );
    let recovered = RobustnessFormula::atomic(
        Perturbation::atomic(0, brake),
        later,
        RelationOperator::LessThan,
        0.05,
    );
    let formula = RobustnessFormula::conjunction(perturbed_now, recovered);

    let semantics = BooleanSemantics::new();
    let function = formula.boolean_evaluation_function(semantics.with_parallel(true));

    for step in 0..3 {
        assert!(semantics.eval(&formula, 4, step, &sequence)?);
        assert!(function(4, step, &sequence)?);
    }

    Ok(())
}

#[test]
fn speed_distribution_monitoring() -> Result<(), Box<dyn Error>> {
    let sequence = vehicle(2)?;
    let slow_down = DataStateFunction::new(|rng, s| {
        s.apply(&[DataStateUpdate::new(0, s[0] - rng.gen::<f64>() * 0.2)])
    });
    let predicate = DistributionPredicate::function(slow_down, speed(), 0.1);
    let steady = DisTlFormula::always(DisTlFormula::target(predicate), 0, 2)?;
    let formula = DisTlFormula::eventually(steady, 0, 3)?;

    let function = formula.double_evaluation_function(DoubleSemantics::new().with_seed(4));
    let expected = function(5, 1, &sequence)?;

    let mut monitor = MonitorBuilder::new(5).with_seed(4).build(&formula, 1);
    let mut value = None;

    for step in 0..1 + formula.time_horizon().unwrap_or_default() {
        value = monitor.consume(&sequence.perceived(step))?;
    }

    assert!(expected > 0.0);
    assert_relative_eq!(value.unwrap_or(f64::NAN), expected, epsilon = EPSILON);
    Ok(())
}
