//! Admission policies.
//!
//! When a write would push the cache over capacity, the admission policy is
//! asked whether the candidate may displace the next victim. Policies also
//! observe the reads and writes replayed during maintenance. All calls happen
//! under the maintenance lock, so policies are free to mutate themselves.

mod sketch;

pub use self::sketch::{FrequencySketch, DEFAULT_SKETCH_WIDTH};

use std::fmt::Debug;
use std::hash::Hash;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// Decides if a candidate entry may be admitted at the cost of a victim.
pub trait AdmissionPolicy<K, V>: Send {
    /// Returns true if `candidate` should be admitted, evicting `victim` if
    /// space is needed.
    fn should_admit(&mut self, candidate: &Entry<K, V>, victim: &Entry<K, V>) -> bool;

    /// Observe a read of a resident entry.
    fn register_read(&mut self, _entry: &Entry<K, V>) {}

    /// Observe the admission of a new entry.
    fn register_write(&mut self, _entry: &Entry<K, V>) {}
}

/// The built in admission policies.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AdmissionKind {
    /// Admit everything.
    #[default]
    Idle,
    /// Admit with a fixed probability in `0.0..=1.0`.
    Random(f64),
    /// Admit in proportion to cost/size against the best ratio seen.
    Weighted,
    /// Admit only if the candidate is seen at least as often as the victim.
    Frequency,
}

impl AdmissionKind {
    pub(crate) fn is_valid(&self) -> bool {
        match self {
            AdmissionKind::Random(p) => (0.0..=1.0).contains(p),
            _ => true,
        }
    }

    pub(crate) fn into_policy<K, V>(
        self,
        seed: Option<u64>,
        sketch_width: usize,
        reset_interval: Option<usize>,
    ) -> Box<dyn AdmissionPolicy<K, V>>
    where
        K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
        V: Clone + Debug + Sync + Send + 'static,
    {
        match self {
            AdmissionKind::Idle => Box::new(IdlePolicy),
            AdmissionKind::Random(p) => Box::new(RandomAdmission::new(p, seed)),
            AdmissionKind::Weighted => Box::new(WeightedAdmission::new(seed)),
            AdmissionKind::Frequency => Box::new(FrequencyAdmission::new(FrequencySketch::new(
                sketch_width,
                reset_interval,
            ))),
        }
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Admits every candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlePolicy;

impl<K, V> AdmissionPolicy<K, V> for IdlePolicy {
    fn should_admit(&mut self, _candidate: &Entry<K, V>, _victim: &Entry<K, V>) -> bool {
        true
    }
}

/// Admits candidates with an independent fixed probability. Useful as a
/// control when measuring what a smarter policy buys.
#[derive(Debug)]
pub struct RandomAdmission {
    p: f64,
    rng: StdRng,
}

impl RandomAdmission {
    /// `p` is clamped into `0.0..=1.0`, NaN admits nothing.
    pub fn new(p: f64, seed: Option<u64>) -> Self {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        RandomAdmission {
            p,
            rng: make_rng(seed),
        }
    }
}

impl<K, V> AdmissionPolicy<K, V> for RandomAdmission {
    fn should_admit(&mut self, _candidate: &Entry<K, V>, _victim: &Entry<K, V>) -> bool {
        self.rng.random_bool(self.p)
    }
}

/// Admits a candidate with probability `ratio / max_ratio`, where `ratio` is
/// its cost per unit size and `max_ratio` is the largest ratio written so far.
#[derive(Debug)]
pub struct WeightedAdmission {
    max_ratio: f64,
    rng: StdRng,
}

impl WeightedAdmission {
    /// Create the policy with an initial best ratio of 1.
    pub fn new(seed: Option<u64>) -> Self {
        WeightedAdmission {
            max_ratio: 1.0,
            rng: make_rng(seed),
        }
    }

    /// The largest cost/size ratio observed.
    pub fn max_ratio(&self) -> f64 {
        self.max_ratio
    }
}

impl<K, V> AdmissionPolicy<K, V> for WeightedAdmission
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn should_admit(&mut self, candidate: &Entry<K, V>, _victim: &Entry<K, V>) -> bool {
        let chance = candidate.cost_size_ratio() / self.max_ratio;
        self.rng.random::<f64>() < chance
    }

    fn register_write(&mut self, entry: &Entry<K, V>) {
        let ratio = entry.cost_size_ratio();
        if ratio > self.max_ratio {
            self.max_ratio = ratio;
        }
    }
}

/// A TinyLFU style filter: a candidate is only admitted if its estimated
/// access frequency is not below the victim's.
#[derive(Debug, Default)]
pub struct FrequencyAdmission {
    sketch: FrequencySketch,
}

impl FrequencyAdmission {
    /// Build the policy over `sketch`.
    pub fn new(sketch: FrequencySketch) -> Self {
        FrequencyAdmission { sketch }
    }

    /// The underlying sketch.
    pub fn sketch(&self) -> &FrequencySketch {
        &self.sketch
    }
}

impl<K, V> AdmissionPolicy<K, V> for FrequencyAdmission
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn should_admit(&mut self, candidate: &Entry<K, V>, victim: &Entry<K, V>) -> bool {
        let c = self.sketch.estimate(candidate.key());
        let v = self.sketch.estimate(victim.key());
        tracing::trace!(candidate = ?candidate.key(), c, victim = ?victim.key(), v, "frequency admission");
        c >= v
    }

    fn register_read(&mut self, entry: &Entry<K, V>) {
        self.sketch.increment(entry.key());
    }

    fn register_write(&mut self, entry: &Entry<K, V>) {
        self.sketch.increment(entry.key());
    }
}
