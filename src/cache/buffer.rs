//! Striped read buffers.
//!
//! Each stripe is a bounded lock-free ring. Producers never wait: if their
//! stripe is full the record is handed back and the caller drops it. Only the
//! drainer consumes.

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;

use crate::utils::{ceiling_power_of_two, thread_stripe};

pub(crate) struct ReadBuffer<T> {
    stripes: Box<[CachePadded<ArrayQueue<T>>]>,
    mask: usize,
}

impl<T> ReadBuffer<T> {
    pub(crate) fn new(stripes: usize, capacity: usize) -> Self {
        let n = ceiling_power_of_two(stripes);
        let stripes = (0..n)
            .map(|_| CachePadded::new(ArrayQueue::new(capacity.max(1))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ReadBuffer { stripes, mask: n - 1 }
    }

    /// Append to the calling thread's stripe. Returns the stripe length after
    /// the push, or the item back if the stripe was full.
    pub(crate) fn record(&self, item: T) -> Result<usize, T> {
        let stripe = &self.stripes[thread_stripe() & self.mask];
        stripe.push(item)?;
        Ok(stripe.len())
    }

    /// Pop at most `max` records from one stripe, in the order they were
    /// recorded.
    pub(crate) fn drain_stripe<F>(&self, idx: usize, max: usize, mut f: F) -> usize
    where
        F: FnMut(T),
    {
        let stripe = &self.stripes[idx & self.mask];
        let mut n = 0;
        while n < max {
            match stripe.pop() {
                Some(item) => {
                    f(item);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub(crate) fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.stripes.iter().map(|s| s.len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stripes.iter().all(|s| s.is_empty())
    }
}
