// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Ordered set of deadlines behind the [`TimerBackend`] strategy trait.
//!
//! [`DeadlineHeap`] is the default implementation: a binary min-heap keyed by
//! `(due, seq)` where `seq` is a monotonic insertion counter, so duplicate
//! due-times pop in insertion order. Removal is lazy: a live-set keyed by id
//! tombstones heap entries, and stale entries are skipped at the top.

use std::{cmp::{Ordering, Reverse},
          collections::{BinaryHeap, HashMap},
          time::Instant};

/// Strategy seam for the deadline source. The heap-based implementation is
/// the default; an implementation backed by a native event library's timer
/// wheel satisfies the same contract.
pub trait TimerBackend {
    fn insert(&mut self, id: u64, due: Instant);

    /// Returns `true` iff the id was pending.
    fn remove(&mut self, id: u64) -> bool;

    /// Earliest pending deadline. Takes `&mut self` so implementations may
    /// prune lazily-removed entries while peeking.
    fn peek_due(&mut self) -> Option<Instant>;

    /// Pop the next deadline with `due <= now`, FIFO among equal due-times.
    fn pop_due_before(&mut self, now: Instant) -> Option<u64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool { self.len() == 0 }

    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    due: Instant,
    seq: u64,
    id: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

#[derive(Debug, Default)]
pub struct DeadlineHeap {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// id -> seq of the entry that is currently valid for that id. Entries
    /// in the heap whose seq does not match are stale and get skipped.
    live: HashMap<u64, u64>,
    seq: u64,
}

impl DeadlineHeap {
    #[must_use]
    pub fn new() -> Self { DeadlineHeap::default() }

    /// Drop stale tombstoned entries sitting at the top of the heap.
    fn prune_top(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            match self.live.get(&top.id) {
                Some(seq) if *seq == top.seq => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

impl TimerBackend for DeadlineHeap {
    fn insert(&mut self, id: u64, due: Instant) {
        self.seq += 1;
        let seq = self.seq;
        self.live.insert(id, seq);
        self.heap.push(Reverse(HeapEntry { due, seq, id }));
    }

    fn remove(&mut self, id: u64) -> bool { self.live.remove(&id).is_some() }

    fn peek_due(&mut self) -> Option<Instant> {
        self.prune_top();
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    fn pop_due_before(&mut self, now: Instant) -> Option<u64> {
        self.prune_top();
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.due <= now => {
                let id = entry.id;
                self.heap.pop();
                self.live.remove(&id);
                Some(id)
            }
            _ => None,
        }
    }

    fn len(&self) -> usize { self.live.len() }

    fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_pop_order_is_by_due_time() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(1, now + Duration::from_millis(30));
        heap.insert(2, now + Duration::from_millis(10));
        heap.insert(3, now + Duration::from_millis(20));

        let later = now + Duration::from_millis(100);
        assert_eq!(heap.pop_due_before(later), Some(2));
        assert_eq!(heap.pop_due_before(later), Some(3));
        assert_eq!(heap.pop_due_before(later), Some(1));
        assert_eq!(heap.pop_due_before(later), None);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let due = Instant::now();
        let mut heap = DeadlineHeap::new();
        for id in [7, 3, 9] {
            heap.insert(id, due);
        }
        assert_eq!(heap.pop_due_before(due), Some(7));
        assert_eq!(heap.pop_due_before(due), Some(3));
        assert_eq!(heap.pop_due_before(due), Some(9));
    }

    #[test]
    fn test_pop_respects_now() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(1, now + Duration::from_secs(60));
        assert_eq!(heap.pop_due_before(now), None);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_remove_tombstones_entry() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(1, now);
        heap.insert(2, now + Duration::from_millis(1));

        assert!(heap.remove(1));
        assert!(!heap.remove(1));
        assert_eq!(heap.len(), 1);

        assert_eq!(heap.peek_due(), Some(now + Duration::from_millis(1)));
        assert_eq!(heap.pop_due_before(now + Duration::from_secs(1)), Some(2));
    }

    #[test]
    fn test_reinsert_same_id_invalidates_old_entry() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(1, now);
        // Periodic reschedule: same id, later due.
        heap.insert(1, now + Duration::from_millis(50));

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.pop_due_before(now), None);
        assert_eq!(
            heap.pop_due_before(now + Duration::from_millis(50)),
            Some(1)
        );
    }
}
