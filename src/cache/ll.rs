//! Doubly linked lists whose nodes live in a shared slot arena.
//!
//! Several lists may share one arena (the CAMP buckets do), and a node is
//! addressed by its [SlotId] for its whole life, so callers can hold ids in
//! entries, heaps and queues without borrowing the list.

use std::fmt::Debug;
use std::ops::{Index, IndexMut};

/// A stable handle to an occupied arena slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(usize);

impl SlotId {
    pub(crate) fn index(self) -> usize {
        self.0
    }

    pub(crate) fn from_index(idx: usize) -> Self {
        SlotId(idx)
    }
}

#[derive(Debug)]
pub(crate) struct SlotArena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub(crate) fn new() -> Self {
        SlotArena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> SlotId {
        let idx = match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx].is_none());
                self.slots[idx] = Some(value);
                idx
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        self.len += 1;
        SlotId(idx)
    }

    pub(crate) fn remove(&mut self, id: SlotId) -> Option<T> {
        let value = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(value)
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&T> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl<T> Index<SlotId> for SlotArena<T> {
    type Output = T;

    fn index(&self, id: SlotId) -> &T {
        match self.slots.get(id.0) {
            Some(Some(v)) => v,
            _ => unreachable!("vacant arena slot {}", id.0),
        }
    }
}

impl<T> IndexMut<SlotId> for SlotArena<T> {
    fn index_mut(&mut self, id: SlotId) -> &mut T {
        match self.slots.get_mut(id.0) {
            Some(Some(v)) => v,
            _ => unreachable!("vacant arena slot {}", id.0),
        }
    }
}

/// An arena node: a value plus its list links.
#[derive(Debug)]
pub(crate) struct LLNode<T> {
    pub(crate) v: T,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

impl<T> LLNode<T> {
    pub(crate) fn new(v: T) -> Self {
        LLNode {
            v,
            prev: None,
            next: None,
        }
    }
}

/// Head/tail bookkeeping for one list. Not thread safe, callers hold the
/// maintenance lock.
#[derive(Clone, Debug, Default)]
pub(crate) struct LL {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl LL {
    pub(crate) fn new() -> Self {
        LL::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn peek_head(&self) -> Option<SlotId> {
        self.head
    }

    #[cfg(test)]
    pub(crate) fn peek_tail(&self) -> Option<SlotId> {
        self.tail
    }

    pub(crate) fn is_head(&self, id: SlotId) -> bool {
        self.head == Some(id)
    }

    // Link an unlinked node in at the tail end.
    pub(crate) fn push_tail<T>(&mut self, arena: &mut SlotArena<LLNode<T>>, id: SlotId) {
        debug_assert!(arena[id].prev.is_none());
        debug_assert!(arena[id].next.is_none());
        debug_assert!(!self.is_head(id));

        let pred = self.tail;
        {
            let n = &mut arena[id];
            n.prev = pred;
            n.next = None;
        }
        match pred {
            Some(p) => {
                debug_assert!(arena[p].next.is_none());
                arena[p].next = Some(id);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub(crate) fn pop_head<T>(&mut self, arena: &mut SlotArena<LLNode<T>>) -> Option<SlotId> {
        let head = self.head?;
        let removed = self.remove(arena, head);
        debug_assert!(removed);
        Some(head)
    }

    /// Cut a node out from any position. Returns false, changing nothing, if
    /// the node is not linked into this list.
    pub(crate) fn remove<T>(&mut self, arena: &mut SlotArena<LLNode<T>>, id: SlotId) -> bool {
        let (prev, next) = {
            let n = &arena[id];
            (n.prev, n.next)
        };

        // An unlinked node has no prev and is not our head.
        if prev.is_none() && !self.is_head(id) {
            return false;
        }

        // prev <-> n <-> next  ==>  prev <-> next
        match prev {
            Some(p) => arena[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena[n].prev = prev,
            None => self.tail = prev,
        }

        let n = &mut arena[id];
        n.prev = None;
        n.next = None;
        self.len -= 1;
        true
    }

    // Given a linked node, move it to the tail. IE hit.
    pub(crate) fn move_tail<T>(&mut self, arena: &mut SlotArena<LLNode<T>>, id: SlotId) {
        if self.tail == Some(id) {
            return;
        }
        if self.remove(arena, id) {
            self.push_tail(arena, id);
        }
    }

    #[cfg(test)]
    pub(crate) fn iter_ids<'a, T>(
        &self,
        arena: &'a SlotArena<LLNode<T>>,
    ) -> impl Iterator<Item = SlotId> + 'a {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = arena[id].next;
            Some(id)
        })
    }

    #[cfg(test)]
    pub(crate) fn verify<T: Debug>(&self, arena: &SlotArena<LLNode<T>>) {
        let mut size = 0;
        let mut prev = None;
        let mut cur = self.head;

        while let Some(id) = cur {
            let n = &arena[id];
            // Each node must point back to the one we came from.
            assert_eq!(n.prev, prev);
            size += 1;
            prev = Some(id);
            cur = n.next;
        }

        assert_eq!(self.tail, prev);
        assert_eq!(self.len, size);
        assert_eq!(self.head.is_none(), self.tail.is_none());
    }
}
