//! The backing key to entry map.
//!
//! The cache only needs three operations from its store: lookup, insert if the
//! key is vacant, and removal of one specific entry. Any thread safe map can
//! provide these; [ShardedStore] is the one used unless the builder is given
//! another.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_utils::CachePadded;

use crate::entry::Entry;
use crate::utils::{ceiling_power_of_two, RandomState};

/// A concurrent map of keys to cache entries.
pub trait BackingStore<K, V>: Send + Sync {
    /// Look up the live entry for `k`.
    fn get(&self, k: &K) -> Option<Arc<Entry<K, V>>>;

    /// Insert `entry` under its key if, and only if, no entry is present.
    /// Returns true if the entry was inserted.
    fn insert_if_absent(&self, entry: Arc<Entry<K, V>>) -> bool;

    /// Remove `entry`, but only if it is still the entry stored under its key.
    /// Returns true if it was removed.
    fn remove_entry(&self, entry: &Arc<Entry<K, V>>) -> bool;

    /// The number of entries in the store.
    fn len(&self) -> usize;

    /// True if the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Shard<K, V> = CachePadded<RwLock<HashMap<K, Arc<Entry<K, V>>, RandomState>>>;

/// A hash map split into independently locked shards. Lookups only take a
/// shard read lock, so readers of different keys rarely meet.
pub struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    mask: usize,
    hasher: RandomState,
}

impl<K, V> ShardedStore<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    /// Create a store with `concurrency` rounded up to a power of two shards.
    pub fn new(concurrency: usize) -> Self {
        let n = ceiling_power_of_two(concurrency);
        let shards = (0..n)
            .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(RandomState::default()))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ShardedStore {
            shards,
            mask: n - 1,
            hasher: RandomState::default(),
        }
    }

    fn shard(&self, k: &K) -> &Shard<K, V> {
        let h = self.hasher.hash_one(k) as usize;
        &self.shards[h & self.mask]
    }

    #[cfg(test)]
    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<K, V> BackingStore<K, V> for ShardedStore<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn get(&self, k: &K) -> Option<Arc<Entry<K, V>>> {
        let shard = self.shard(k).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(k).cloned()
    }

    fn insert_if_absent(&self, entry: Arc<Entry<K, V>>) -> bool {
        let mut shard = self
            .shard(entry.key())
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if shard.contains_key(entry.key()) {
            false
        } else {
            shard.insert(entry.key().clone(), entry);
            true
        }
    }

    fn remove_entry(&self, entry: &Arc<Entry<K, V>>) -> bool {
        let mut shard = self
            .shard(entry.key())
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.get(entry.key()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                shard.remove(entry.key());
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}
