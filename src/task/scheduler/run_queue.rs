//! Intrusive, allocation-free bitmap-indexed multi-level FIFO run queue.
//!
//! Each priority level is a singly-linked FIFO threaded through
//! `Thread.next[SCHED_QUEUE]`; a 32-bit bitmap tracks which levels are
//! non-empty so the highest-priority runnable thread is found in O(1)
//! via `leading_zeros`, with no heap allocation on the enqueue/dequeue path.

use crate::task::thread::{Thread, NUM_PRIORITIES, SCHED_QUEUE};
use alloc::collections::BTreeMap;

const NONE: u32 = u32::MAX;

pub(super) struct RunQueue {
    heads: [u32; NUM_PRIORITIES],
    tails: [u32; NUM_PRIORITIES],
    bits: u32,
    count: usize,
}

impl RunQueue {
    pub(super) fn new() -> Self {
        RunQueue { heads: [NONE; NUM_PRIORITIES], tails: [NONE; NUM_PRIORITIES], bits: 0, count: 0 }
    }

    /// Enqueue `tid` at the back of its priority level's FIFO.
    pub(super) fn enqueue(&mut self, threads: &mut BTreeMap<u32, Thread>, tid: u32, priority: u8) {
        let p = (priority as usize).min(NUM_PRIORITIES - 1);
        threads.get_mut(&tid).unwrap().next[SCHED_QUEUE] = NONE;
        if self.tails[p] == NONE {
            self.heads[p] = tid;
        } else {
            threads.get_mut(&self.tails[p]).unwrap().next[SCHED_QUEUE] = tid;
        }
        self.tails[p] = tid;
        self.bits |= 1 << p;
        self.count += 1;
    }

    /// Dequeue the highest-priority thread's FIFO head. O(1) via bitmap.
    pub(super) fn dequeue_highest(&mut self, threads: &mut BTreeMap<u32, Thread>) -> Option<u32> {
        let p = self.highest_priority()?;
        let tid = self.heads[p];
        let next = threads.get(&tid).unwrap().next[SCHED_QUEUE];
        self.heads[p] = next;
        if next == NONE {
            self.tails[p] = NONE;
            self.bits &= !(1 << p);
        }
        self.count -= 1;
        Some(tid)
    }

    /// Remove a specific TID from whichever level it currently occupies.
    /// O(level size); used only for kill/exit of a Ready-but-not-current thread.
    pub(super) fn remove(&mut self, threads: &mut BTreeMap<u32, Thread>, tid: u32) {
        for p in 0..NUM_PRIORITIES {
            if self.heads[p] == NONE {
                continue;
            }
            let mut prev: Option<u32> = None;
            let mut cur = self.heads[p];
            while cur != NONE {
                let next = threads.get(&cur).unwrap().next[SCHED_QUEUE];
                if cur == tid {
                    match prev {
                        Some(pv) => threads.get_mut(&pv).unwrap().next[SCHED_QUEUE] = next,
                        None => self.heads[p] = next,
                    }
                    if self.tails[p] == tid {
                        self.tails[p] = prev.unwrap_or(NONE);
                    }
                    if self.heads[p] == NONE {
                        self.bits &= !(1 << p);
                    }
                    self.count -= 1;
                    return;
                }
                prev = Some(cur);
                cur = next;
            }
        }
    }

    #[inline]
    pub(super) fn total_count(&self) -> usize {
        self.count
    }

    pub(super) fn is_empty(&self) -> bool {
        self.bits == 0
    }

    fn highest_priority(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some(31 - self.bits.leading_zeros() as usize)
        }
    }
}
