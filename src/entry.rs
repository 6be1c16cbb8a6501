//! The record stored per key.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cache::ll::SlotId;

const UNLINKED: usize = usize::MAX;

/// A cached key and value, with the cost and size that drive admission and
/// eviction. Entries are shared between the backing store, the access buffers
/// and the eviction structures. Once an entry is evicted it is dead forever;
/// re-inserting the key creates a new entry.
#[derive(Debug)]
pub struct Entry<K, V> {
    key: K,
    value: V,
    cost: u64,
    size: usize,
    evicted: AtomicBool,
    // Arena slot of this entry in the eviction structures. Only touched while
    // the maintenance lock is held.
    slot: AtomicUsize,
    // Set when the admission decision could not be taken on the write path.
    deferred_admission: bool,
    // Set once the admission policy has observed this write.
    write_registered: bool,
}

impl<K, V> Entry<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    /// Create a new, unlinked entry. `size` must be non-zero.
    pub fn new(key: K, value: V, cost: u64, size: usize) -> Self {
        debug_assert!(size > 0);
        Entry {
            key,
            value,
            cost,
            size,
            evicted: AtomicBool::new(false),
            slot: AtomicUsize::new(UNLINKED),
            deferred_admission: false,
            write_registered: false,
        }
    }

    /// The key of this entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The application defined cost of recreating this value.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// The size this entry contributes to the cache load.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Cost per unit of size.
    pub fn cost_size_ratio(&self) -> f64 {
        self.cost as f64 / self.size as f64
    }

    /// True once the entry has been evicted or refused admission.
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    pub(crate) fn defer_admission(&mut self) {
        self.deferred_admission = true;
    }

    pub(crate) fn deferred_admission(&self) -> bool {
        self.deferred_admission
    }

    pub(crate) fn mark_write_registered(&mut self) {
        self.write_registered = true;
    }

    pub(crate) fn write_registered(&self) -> bool {
        self.write_registered
    }

    pub(crate) fn slot(&self) -> Option<SlotId> {
        match self.slot.load(Ordering::Relaxed) {
            UNLINKED => None,
            idx => Some(SlotId::from_index(idx)),
        }
    }

    pub(crate) fn set_slot(&self, id: SlotId) {
        self.slot.store(id.index(), Ordering::Relaxed);
    }

    pub(crate) fn clear_slot(&self) {
        self.slot.store(UNLINKED, Ordering::Relaxed);
    }
}
