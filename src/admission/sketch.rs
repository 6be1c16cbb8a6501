//! A counting filter that estimates how often a key has been seen.
//!
//! Each key maps to `PROBES` counters chosen by double hashing. Increments are
//! conservative: only the probed counters holding the current minimum are
//! bumped, and the estimate is that minimum. Collisions can only inflate an
//! estimate, never deflate it.

use std::hash::{BuildHasher, Hash};

use crate::utils::{ceiling_power_of_two, RandomState};

const PROBES: usize = 3;

/// The default number of counters.
pub const DEFAULT_SKETCH_WIDTH: usize = 512;

/// An approximate frequency counter with optional periodic aging.
#[derive(Debug, Clone)]
pub struct FrequencySketch {
    table: Box<[u16]>,
    mask: usize,
    hasher: RandomState,
    additions: usize,
    reset_interval: Option<usize>,
}

impl Default for FrequencySketch {
    fn default() -> Self {
        FrequencySketch::new(DEFAULT_SKETCH_WIDTH, None)
    }
}

impl FrequencySketch {
    /// Create a sketch of `width` counters, rounded up to a power of two. If
    /// `reset_interval` is set, every counter is halved after that many
    /// increments so that old popularity fades.
    pub fn new(width: usize, reset_interval: Option<usize>) -> Self {
        let width = ceiling_power_of_two(width);
        FrequencySketch {
            table: vec![0; width].into_boxed_slice(),
            mask: width - 1,
            hasher: RandomState::default(),
            additions: 0,
            reset_interval: reset_interval.filter(|i| *i > 0),
        }
    }

    /// The number of counters.
    pub fn width(&self) -> usize {
        self.table.len()
    }

    fn probes<Q: Hash + ?Sized>(&self, k: &Q) -> [usize; PROBES] {
        let hash = self.hasher.hash_one(k);
        let primary = hash as u32 as usize;
        // Odd, so the probe sequence never sits on one slot.
        let secondary = ((hash >> 32) as usize) | 1;
        let mut slots = [0; PROBES];
        let mut combined = primary;
        for slot in slots.iter_mut() {
            *slot = combined & self.mask;
            combined = combined.wrapping_add(secondary);
        }
        slots
    }

    fn min_of(&self, slots: &[usize; PROBES]) -> u16 {
        slots
            .iter()
            .map(|s| self.table[*s])
            .min()
            .unwrap_or_default()
    }

    /// Record one occurrence of `k`.
    pub fn increment<Q: Hash + ?Sized>(&mut self, k: &Q) {
        let slots = self.probes(k);
        let min = self.min_of(&slots);
        if min == u16::MAX {
            return;
        }
        for s in slots {
            // A slot probed twice has already moved past min.
            if self.table[s] == min {
                self.table[s] += 1;
            }
        }

        self.additions += 1;
        if let Some(interval) = self.reset_interval {
            if self.additions >= interval {
                self.halve();
            }
        }
    }

    /// The estimated number of occurrences of `k`.
    pub fn estimate<Q: Hash + ?Sized>(&self, k: &Q) -> u16 {
        let slots = self.probes(k);
        self.min_of(&slots)
    }

    fn halve(&mut self) {
        for c in self.table.iter_mut() {
            *c >>= 1;
        }
        self.additions /= 2;
        tracing::trace!(additions = self.additions, "frequency sketch aged");
    }
}
