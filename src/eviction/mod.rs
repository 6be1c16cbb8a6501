//! Eviction strategies.
//!
//! A strategy owns the ordering of resident entries and names the next victim.
//! It never touches the backing store or the load counter, the cache engine
//! does that when it takes a victim. Every method is called with the
//! maintenance lock held.

mod camp;
mod heap;
mod lru;

pub(crate) use self::camp::CampStrategy;
pub(crate) use self::lru::LruStrategy;

pub use self::camp::{bucket_index, DEFAULT_PRECISION, RANGE};

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::entry::Entry;

pub(crate) trait EvictionStrategy<K, V>: Send {
    /// Refresh a resident entry after it was read. Entries that are not
    /// linked yet are ignored.
    fn on_read(&mut self, entry: &Arc<Entry<K, V>>);

    /// Link a newly admitted entry.
    fn on_write(&mut self, entry: Arc<Entry<K, V>>);

    /// The entry that `pop_victim` would return.
    fn peek_victim(&self) -> Option<&Arc<Entry<K, V>>>;

    /// Unlink and return the next entry to evict.
    fn pop_victim(&mut self) -> Option<Arc<Entry<K, V>>>;

    /// Number of linked entries.
    fn len(&self) -> usize;
}

/// The available eviction strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EvictionKind {
    /// Evict the least recently used entry.
    #[default]
    Lru,
    /// Evict the least recently used entry of the cheapest cost/size bucket.
    Camp,
}

impl EvictionKind {
    pub(crate) fn into_strategy<K, V>(self, precision: u32) -> Box<dyn EvictionStrategy<K, V>>
    where
        K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
        V: Clone + Debug + Sync + Send + 'static,
    {
        match self {
            EvictionKind::Lru => Box::new(LruStrategy::new()),
            EvictionKind::Camp => Box::new(CampStrategy::new(precision)),
        }
    }
}
