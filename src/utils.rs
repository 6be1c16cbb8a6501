use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "ahash")]
pub(crate) use ahash::RandomState;

#[cfg(all(feature = "foldhash", not(feature = "ahash")))]
pub(crate) use foldhash::fast::RandomState;

#[cfg(all(not(feature = "ahash"), not(feature = "foldhash")))]
pub(crate) use std::collections::hash_map::RandomState;

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local!(static STRIPE_ID: usize = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed));

/// A stable per-thread number, handed out in thread creation order. Callers
/// mask it down to pick a stripe.
pub(crate) fn thread_stripe() -> usize {
    STRIPE_ID.with(|id| *id)
}

pub(crate) fn ceiling_power_of_two(x: usize) -> usize {
    x.max(1).next_power_of_two()
}
