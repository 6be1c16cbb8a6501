//! Least recently used eviction.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use super::EvictionStrategy;
use crate::cache::ll::{LLNode, SlotArena, LL};
use crate::entry::Entry;

/// One recency list: reads move to the tail, victims leave from the head.
pub(crate) struct LruStrategy<K, V> {
    arena: SlotArena<LLNode<Arc<Entry<K, V>>>>,
    ll: LL,
}

impl<K, V> LruStrategy<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    pub(crate) fn new() -> Self {
        LruStrategy {
            arena: SlotArena::new(),
            ll: LL::new(),
        }
    }
}

impl<K, V> EvictionStrategy<K, V> for LruStrategy<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn on_read(&mut self, entry: &Arc<Entry<K, V>>) {
        let Some(id) = entry.slot() else {
            // Its write has not been replayed yet.
            return;
        };
        debug_assert!(self
            .arena
            .get(id)
            .is_some_and(|n| Arc::ptr_eq(&n.v, entry)));
        self.ll.move_tail(&mut self.arena, id);
    }

    fn on_write(&mut self, entry: Arc<Entry<K, V>>) {
        debug_assert!(entry.slot().is_none());
        let id = self.arena.insert(LLNode::new(entry.clone()));
        entry.set_slot(id);
        self.ll.push_tail(&mut self.arena, id);
    }

    fn peek_victim(&self) -> Option<&Arc<Entry<K, V>>> {
        self.ll.peek_head().map(|id| &self.arena[id].v)
    }

    fn pop_victim(&mut self) -> Option<Arc<Entry<K, V>>> {
        let id = self.ll.pop_head(&mut self.arena)?;
        let node = self.arena.remove(id)?;
        node.v.clear_slot();
        Some(node.v)
    }

    fn len(&self) -> usize {
        debug_assert_eq!(self.ll.len(), self.arena.len());
        self.ll.len()
    }
}
