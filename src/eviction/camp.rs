//! Cost aware eviction (CAMP).
//!
//! Entries are bucketed by their cost/size ratio, rounded so that only a
//! handful of significant bits survive. Each bucket is an LRU list. A min-heap
//! holds exactly one representative per non-empty bucket: its head. The heap
//! key of a node is `base + bucket`, where `base` is the key of the heap top at
//! the time the node was last touched. Cheap buckets therefore go first, but a
//! bucket that has not been refreshed for a while drifts down to the top and
//! loses its cost advantage.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use super::heap::{HeapItem, IndexedHeap};
use super::EvictionStrategy;
use crate::cache::ll::{LLNode, SlotArena, SlotId, LL};
use crate::entry::Entry;

const MIN_PRIORITY: u64 = 1;
const MAX_PRIORITY: u64 = 5000;

/// The number of priority buckets.
pub const RANGE: usize = (MAX_PRIORITY - MIN_PRIORITY + 1) as usize;

/// Significant bits kept when rounding a priority.
pub const DEFAULT_PRECISION: u32 = 5;

/// Keep only the top `precision` significant bits of `n`.
fn round_to_precision(n: u32, precision: u32) -> u32 {
    let bits = u32::BITS - n.leading_zeros();
    let extra = bits.saturating_sub(precision);
    if extra >= u32::BITS {
        0
    } else {
        (n >> extra) << extra
    }
}

/// The priority bucket of an entry with this cost and size.
pub fn bucket_index(cost: u64, size: usize, precision: u32) -> usize {
    let ratio = cost / (size as u64).saturating_mul(MIN_PRIORITY).max(1);
    let clamped = ratio.min(RANGE as u64 - 1) as u32;
    round_to_precision(clamped, precision) as usize
}

struct CampNode<K, V> {
    entry: Arc<Entry<K, V>>,
    bucket: usize,
    ordering: u64,
    heap_pos: Option<usize>,
}

type Arena<K, V> = SlotArena<LLNode<CampNode<K, V>>>;

pub(crate) struct CampStrategy<K, V> {
    arena: Arena<K, V>,
    buckets: Box<[LL]>,
    heap: IndexedHeap,
    precision: u32,
    seq: u64,
}

impl<K, V> CampStrategy<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    pub(crate) fn new(precision: u32) -> Self {
        CampStrategy {
            arena: SlotArena::new(),
            buckets: vec![LL::new(); RANGE].into_boxed_slice(),
            heap: IndexedHeap::new(),
            precision,
            seq: 0,
        }
    }

    fn base_priority(&self) -> u64 {
        self.heap.peek().map(|item| item.ordering).unwrap_or(0)
    }

    // Make a bucket head the representative of its bucket.
    fn offer(&mut self, id: SlotId) {
        self.seq += 1;
        let item = HeapItem {
            ordering: self.arena[id].v.ordering,
            seq: self.seq,
            id,
        };
        let Self { arena, heap, .. } = self;
        heap.push(item, &mut |id, pos| arena[id].v.heap_pos = pos);
    }

    fn withdraw(&mut self, id: SlotId) {
        if let Some(pos) = self.arena[id].v.heap_pos {
            let Self { arena, heap, .. } = self;
            let item = heap.remove(pos, &mut |id, pos| arena[id].v.heap_pos = pos);
            debug_assert_eq!(item.id, id);
        }
    }

    #[cfg(test)]
    fn verify(&self) {
        self.heap.verify();
        let mut non_empty = 0;
        for ll in self.buckets.iter() {
            ll.verify(&self.arena);
            if let Some(head) = ll.peek_head() {
                non_empty += 1;
                // Every bucket head is on the heap, nothing else is.
                assert!(self.arena[head].v.heap_pos.is_some());
                for id in ll.iter_ids(&self.arena).skip(1) {
                    assert!(self.arena[id].v.heap_pos.is_none());
                }
            }
        }
        assert_eq!(non_empty, self.heap.len());
    }
}

impl<K, V> Debug for CampNode<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampNode")
            .field("key", self.entry.key())
            .field("bucket", &self.bucket)
            .field("ordering", &self.ordering)
            .finish()
    }
}

impl<K, V> EvictionStrategy<K, V> for CampStrategy<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn on_read(&mut self, entry: &Arc<Entry<K, V>>) {
        let Some(id) = entry.slot() else {
            return;
        };
        debug_assert!(self
            .arena
            .get(id)
            .is_some_and(|n| Arc::ptr_eq(&n.v.entry, entry)));

        let index = self.arena[id].v.bucket;
        let was_head = self.buckets[index].is_head(id);
        if was_head {
            self.withdraw(id);
        }

        let removed = self.buckets[index].remove(&mut self.arena, id);
        debug_assert!(removed);
        // Empty implies we were the head; only then does the node rejoin the
        // heap as the sole member of its bucket.
        let was_empty = self.buckets[index].is_empty();
        if was_head && !was_empty {
            if let Some(head) = self.buckets[index].peek_head() {
                self.offer(head);
            }
        }

        self.arena[id].v.ordering = self.base_priority() + index as u64;
        self.buckets[index].push_tail(&mut self.arena, id);
        if was_empty {
            self.offer(id);
        }
    }

    fn on_write(&mut self, entry: Arc<Entry<K, V>>) {
        debug_assert!(entry.slot().is_none());
        let index = bucket_index(entry.cost(), entry.size(), self.precision);
        let ordering = self.base_priority() + index as u64;
        let id = self.arena.insert(LLNode::new(CampNode {
            entry: entry.clone(),
            bucket: index,
            ordering,
            heap_pos: None,
        }));
        entry.set_slot(id);

        let was_empty = self.buckets[index].is_empty();
        self.buckets[index].push_tail(&mut self.arena, id);
        if was_empty {
            self.offer(id);
        }
    }

    fn peek_victim(&self) -> Option<&Arc<Entry<K, V>>> {
        self.heap.peek().map(|item| &self.arena[item.id].v.entry)
    }

    fn pop_victim(&mut self) -> Option<Arc<Entry<K, V>>> {
        let item = {
            let Self { arena, heap, .. } = self;
            heap.pop(&mut |id, pos| arena[id].v.heap_pos = pos)?
        };
        let id = item.id;
        let index = self.arena[id].v.bucket;
        debug_assert!(self.buckets[index].is_head(id));

        let removed = self.buckets[index].remove(&mut self.arena, id);
        debug_assert!(removed);
        if let Some(head) = self.buckets[index].peek_head() {
            self.offer(head);
        }

        let node = self.arena.remove(id)?;
        node.v.entry.clear_slot();
        Some(node.v.entry)
    }

    fn len(&self) -> usize {
        self.arena.len()
    }
}
