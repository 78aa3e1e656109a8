//! Evolution sequences: lazily computed distributions of system trajectories.
//!
//! An [`EvolutionSequence`] stores, for every step `i`, the [`SampleSet`] obtained by sampling `i`
//! steps of every element of the initial sample set. Sample sets are computed on demand and
//! cached; requesting step `i` computes every missing step up to `i` in increasing order, so the
//! random draws consumed by a step never depend on the order in which steps are requested.
//!
//! A perturbed copy of a sequence is obtained with [`EvolutionSequence::apply`]. The perturbed
//! sequence shares every sample set before the perturbation step with the nominal one, and from
//! that step on evolves the replicated and perturbed sample sets independently.
//!
//! ```rust
//! use stark::combinator::Perturbation;
//! use stark::controller::Controller;
//! use stark::ds::{DataState, DataStateUpdate};
//! use stark::functions::DataStateFunction;
//! use stark::sequence::EvolutionSequence;
//! use stark::system::{Observable, SystemState};
//!
//! let environment =
//!     DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 1.0)]));
//! let sequence = EvolutionSequence::new(
//!     0,
//!     move |_| SystemState::new(Controller::Nil, environment.clone(), DataState::new(vec![0.0])),
//!     10,
//! );
//!
//! let shift = DataStateFunction::new(|_, s| s.apply(&[DataStateUpdate::new(0, s[0] + 10.0)]));
//! let perturbed = sequence.apply(&Perturbation::atomic(0, shift), 2, 3).unwrap();
//!
//! assert_eq!(perturbed.perceived(1), sequence.perceived(1));
//! assert_eq!(perturbed.get(4).len(), 30);
//! assert_eq!(perturbed.get(4).states()[0].data_state()[0], 14.0);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::combinator::Perturbation;
use crate::random::{Seed, SimRng};
use crate::sample::SampleSet;
use crate::system::{PerceivedState, SystemState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("A perturbed sequence requires a positive scale")]
    ZeroScale,
}

#[derive(Debug)]
struct Inner {
    sets: Vec<Arc<SampleSet<SystemState>>>,
    rng: SimRng,
    perturbation: Option<Perturbation>,
}

fn perturb(
    perturbation: Option<&Perturbation>,
    sample: SampleSet<SystemState>,
    rng: &mut SimRng,
) -> SampleSet<SystemState> {
    match perturbation.and_then(|p| p.effect()) {
        Some(effect) => sample.apply_distribution(rng, effect),
        None => sample,
    }
}

/// Memoized sequence of sample sets indexed by step.
///
/// Every step is published once. Computed sample sets are shared and can be read from any thread,
/// and threads racing to compute the same step obtain the same sample set.
#[derive(Debug)]
pub struct EvolutionSequence {
    seed: Seed,
    inner: Mutex<Inner>,
}

impl EvolutionSequence {
    /// Create a sequence whose initial sample set contains `size` states drawn from `generator`.
    pub fn new<F>(seed: u64, generator: F, size: usize) -> Self
    where
        F: Fn(&mut SimRng) -> SystemState + Send + Sync,
    {
        let seed = Seed::new(seed);
        let mut rng = seed.rng();
        let initial = SampleSet::generate(&mut rng, generator, size);

        debug!(size, "generated initial sample set");

        Self {
            seed,
            inner: Mutex::new(Inner {
                sets: vec![Arc::new(initial)],
                rng,
                perturbation: None,
            }),
        }
    }

    /// Create a sequence starting from an existing sample set.
    pub fn from_sample_set(seed: u64, initial: SampleSet<SystemState>) -> Self {
        let seed = Seed::new(seed);

        Self {
            seed,
            inner: Mutex::new(Inner {
                sets: vec![Arc::new(initial)],
                rng: seed.rng(),
                perturbation: None,
            }),
        }
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    /// Number of steps computed so far.
    pub fn len(&self) -> usize {
        self.inner.lock().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Compute every missing sample set up to `step`.
    fn extend_to(&self, step: usize) {
        loop {
            let (len, last, mut rng, perturbation) = {
                let inner = self.inner.lock();
                let len = inner.sets.len();

                if len > step {
                    return;
                }

                let perturbation = inner.perturbation.as_ref().map(Perturbation::step);
                (len, Arc::clone(&inner.sets[len - 1]), inner.rng.clone(), perturbation)
            };

            // The lock is released while stepping: sample sets are mapped on the rayon pool, whose
            // workers may read this sequence in the meantime.
            let next = perturb(perturbation.as_ref(), last.sample_next(&mut rng), &mut rng);
            let mut inner = self.inner.lock();

            if inner.sets.len() == len {
                debug!(step = len, size = next.len(), "generated sample set");
                inner.sets.push(Arc::new(next));
                inner.rng = rng;
                inner.perturbation = perturbation;
            }
        }
    }

    /// The sample set at `step`, computing every missing step before it.
    pub fn get(&self, step: usize) -> Arc<SampleSet<SystemState>> {
        self.extend_to(step);
        Arc::clone(&self.inner.lock().sets[step])
    }

    /// The sample sets of the steps in `from..to`.
    pub fn select(&self, from: usize, to: usize) -> Vec<Arc<SampleSet<SystemState>>> {
        if from >= to {
            return Vec::new();
        }

        self.extend_to(to - 1);
        self.inner.lock().sets[from..to].to_vec()
    }

    /// Data-only view of the sample set at `step`.
    pub fn perceived(&self, step: usize) -> SampleSet<PerceivedState> {
        self.get(step).perceive()
    }

    /// Derive the sequence in which `perturbation` starts affecting the systems at `from_step`.
    ///
    /// Every element of the sample set at `from_step` is replicated `scale` times before the
    /// perturbation is applied. The derived sequence is fully determined by the seed of `self`,
    /// `from_step` and `scale`.
    pub fn apply(
        &self,
        perturbation: &Perturbation,
        from_step: usize,
        scale: usize,
    ) -> Result<EvolutionSequence, SequenceError> {
        if scale == 0 {
            return Err(SequenceError::ZeroScale);
        }

        self.extend_to(from_step);

        let (prefix, start) = {
            let inner = self.inner.lock();
            (inner.sets[..from_step].to_vec(), Arc::clone(&inner.sets[from_step]))
        };

        let seed = self.seed.fork(from_step as u64).fork(scale as u64);
        let mut rng = seed.rng();
        let mut inner = Inner {
            sets: prefix,
            rng: rng.clone(),
            perturbation: Some(perturbation.clone()),
        };

        let first = perturb(Some(perturbation), start.replica(scale), &mut rng);
        inner.rng = rng;
        inner.sets.push(Arc::new(first));

        debug!(from_step, scale, "derived perturbed sequence");

        Ok(Self {
            seed,
            inner: Mutex::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::Rng;

    use crate::combinator::Perturbation;
    use crate::controller::Controller;
    use crate::ds::{DataState, DataStateUpdate};
    use crate::functions::{DataStateExpression, DataStateFunction};
    use crate::system::{Observable, SystemState};
    use super::{EvolutionSequence, SequenceError};

    fn noisy_counter(seed: u64, size: usize) -> EvolutionSequence {
        let environment = DataStateFunction::new(|rng, s| {
            s.apply(&[DataStateUpdate::new(0, s[0] + 1.0), DataStateUpdate::new(1, rng.gen())])
        });

        EvolutionSequence::new(
            seed,
            move |rng| {
                let initial = DataState::new(vec![0.0, rng.gen()]);
                SystemState::new(Controller::Nil, environment.clone(), initial)
            },
            size,
        )
    }

    fn shift(amount: f64) -> DataStateFunction {
        DataStateFunction::new(move |_, s| s.apply(&[DataStateUpdate::new(0, s[0] + amount)]))
    }

    #[test]
    fn steps_are_memoized() {
        let sequence = noisy_counter(3, 8);
        let later = sequence.get(5);
        let earlier = sequence.get(2);

        assert_eq!(sequence.len(), 6);
        assert!(Arc::ptr_eq(&later, &sequence.get(5)));
        assert_eq!(earlier.states()[0].data_state().step(), 2);
        assert_eq!(later.states()[0].data_state()[0], 5.0);
    }

    #[test]
    fn selection_of_steps() {
        let sequence = noisy_counter(4, 5);
        let selected = sequence.select(2, 5);

        assert_eq!(sequence.len(), 5);
        assert_eq!(selected.len(), 3);
        assert!(Arc::ptr_eq(&selected[0], &sequence.get(2)));
        assert!(Arc::ptr_eq(&selected[2], &sequence.get(4)));
        assert_eq!(selected[1].states()[0].data_state()[0], 3.0);
        assert!(sequence.select(3, 3).is_empty());
        assert!(sequence.select(4, 1).is_empty());
        assert_eq!(sequence.len(), 5);
    }

    #[test]
    fn request_order_does_not_matter() {
        let s1 = noisy_counter(9, 8);
        let s2 = noisy_counter(9, 8);

        let x = DataStateExpression::variable(1);
        let direct = s1.get(4).values(&x);
        let _ = s2.get(1);
        let _ = s2.get(3);

        assert_eq!(direct, s2.get(4).values(&x));
    }

    #[test]
    fn perturbed_prefix_is_shared() -> Result<(), SequenceError> {
        let sequence = noisy_counter(1, 10);
        let perturbed = sequence.apply(&Perturbation::atomic(0, shift(10.0)), 5, 20)?;

        assert!(Arc::ptr_eq(&perturbed.get(3), &sequence.get(3)));
        assert_eq!(perturbed.perceived(3), sequence.perceived(3));
        assert_eq!(perturbed.get(5).len(), 200);
        assert_eq!(perturbed.get(5).states()[0].data_state()[0], 15.0);
        assert_eq!(perturbed.get(7).states()[0].data_state()[0], 17.0);
        assert_eq!(sequence.get(7).states()[0].data_state()[0], 7.0);
        Ok(())
    }

    #[test]
    fn perturbation_advances_with_sequence() -> Result<(), SequenceError> {
        let sequence = noisy_counter(1, 4);
        let perturbation = Perturbation::persistent(Perturbation::atomic(1, shift(1.0)));
        let perturbed = sequence.apply(&perturbation, 0, 1)?;

        let x = |step: usize| perturbed.get(step).states()[0].data_state()[0];

        assert_eq!(x(0), 0.0);
        assert_eq!(x(1), 2.0);
        assert_eq!(x(2), 3.0);
        assert_eq!(x(3), 5.0);
        Ok(())
    }

    #[test]
    fn apply_is_deterministic() -> Result<(), SequenceError> {
        let sequence = noisy_counter(2, 4);
        let p = Perturbation::atomic(1, shift(1.0));
        let x = DataStateExpression::variable(1);

        let a = sequence.apply(&p, 2, 3)?;
        let b = sequence.apply(&p, 2, 3)?;

        assert_eq!(a.get(6).values(&x), b.get(6).values(&x));
        assert_eq!(sequence.apply(&p, 2, 0).err(), Some(SequenceError::ZeroScale));
        Ok(())
    }
}
