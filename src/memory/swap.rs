//! Swap slot bitmap (component K): a bitmap allocator over a fixed-size
//! backing file, used by the page-fault handler to evict and restore
//! anonymous pages.
//!
//! Grounded on the original's `swapfile.c`: sized to
//! `total_phys_bytes * 4 + 32 MiB` worth of slots, and kept in
//! non-swappable kernel memory (a plain heap `Vec`, never itself mapped
//! into a region that could be evicted).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use crate::sync::spinlock::Spinlock;
use alloc::vec::Vec;

struct SwapState {
    bitmap: Vec<u8>,
    slot_count: usize,
    used: usize,
    /// Slot contents. There is no block device backing this kernel's
    /// swap area, so evicted pages live here in kernel heap memory
    /// instead, populated lazily (only slots actually written get an
    /// entry) rather than reserving `slot_count * SLOT_SIZE` up front.
    store: BTreeMap<usize, Box<[u8; SLOT_SIZE]>>,
}

static STATE: Spinlock<Option<SwapState>> = Spinlock::new_at(None, crate::irql::IRQL_SCHEDULER);

/// Size in bytes of one swap slot (one architecture page).
pub const SLOT_SIZE: usize = crate::memory::FRAME_SIZE;

/// Bring up the swap bitmap, sized from the amount of physical RAM
/// detected by the frame allocator.
pub fn init() {
    let total_phys_bytes = crate::memory::physical::total_frames() * crate::memory::FRAME_SIZE;
    let max_swapfile_bytes = total_phys_bytes * 4 + 32 * 1024 * 1024;
    let slot_count = max_swapfile_bytes / SLOT_SIZE;
    let bitmap_bytes = (slot_count + 7) / 8;

    let mut state = STATE.lock();
    *state = Some(SwapState { bitmap: alloc::vec![0u8; bitmap_bytes], slot_count, used: 0, store: BTreeMap::new() });
    crate::serial_println!("swap: {} slots ({} MiB backing capacity)", slot_count, max_swapfile_bytes / (1024 * 1024));
}

fn get_bit(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] & (1 << (index % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], index: usize, value: bool) {
    if value {
        bitmap[index / 8] |= 1 << (index % 8);
    } else {
        bitmap[index / 8] &= !(1 << (index % 8));
    }
}

/// Allocate a free swap slot index. Fatal if the swapfile is exhausted:
/// there is no recovery path for a system that cannot evict pages.
pub fn allocate_slot() -> usize {
    let mut guard = STATE.lock();
    let state = guard.as_mut().expect("swap not initialized");
    for i in 0..state.slot_count {
        if !get_bit(&state.bitmap, i) {
            set_bit(&mut state.bitmap, i, true);
            state.used += 1;
            return i;
        }
    }
    panic!("swap exhausted: no free slot for eviction");
}

/// Return a slot to the free pool and drop its stored contents.
pub fn deallocate_slot(index: usize) {
    let mut guard = STATE.lock();
    let state = guard.as_mut().expect("swap not initialized");
    set_bit(&mut state.bitmap, index, false);
    state.used -= 1;
    state.store.remove(&index);
}

/// Write a page's worth of data (truncated or zero-padded to
/// [`SLOT_SIZE`]) into an already-allocated slot.
pub fn write_slot(index: usize, data: &[u8]) {
    let mut guard = STATE.lock();
    let state = guard.as_mut().expect("swap not initialized");
    let mut page = Box::new([0u8; SLOT_SIZE]);
    let len = data.len().min(SLOT_SIZE);
    page[..len].copy_from_slice(&data[..len]);
    state.store.insert(index, page);
}

/// Read a slot's contents back out, zero-filling `out` if the slot was
/// never written (shouldn't happen in practice, but a fresh zero page is
/// a safe fallback).
pub fn read_slot(index: usize, out: &mut [u8]) {
    let guard = STATE.lock();
    let state = guard.as_ref().expect("swap not initialized");
    let len = out.len().min(SLOT_SIZE);
    match state.store.get(&index) {
        Some(page) => out[..len].copy_from_slice(&page[..len]),
        None => out[..len].fill(0),
    }
}

/// Number of slots currently occupied.
pub fn used_slot_count() -> usize {
    STATE.lock().as_ref().map(|s| s.used).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_fresh_state(slot_count: usize, f: impl FnOnce()) {
        {
            let mut guard = STATE.lock();
            *guard = Some(SwapState {
                bitmap: alloc::vec![0u8; (slot_count + 7) / 8],
                slot_count,
                used: 0,
                store: BTreeMap::new(),
            });
        }
        f();
    }

    #[test]
    fn allocate_marks_bits_and_tracks_used() {
        with_fresh_state(16, || {
            let a = allocate_slot();
            let b = allocate_slot();
            assert_ne!(a, b);
            assert_eq!(used_slot_count(), 2);
            deallocate_slot(a);
            assert_eq!(used_slot_count(), 1);
            let c = allocate_slot();
            assert_eq!(c, a, "freed slot should be reused first-fit");
        });
    }

    #[test]
    fn write_then_read_slot_round_trips() {
        with_fresh_state(4, || {
            let slot = allocate_slot();
            let mut data = alloc::vec![0u8; SLOT_SIZE];
            data[0] = 0xAB;
            data[SLOT_SIZE - 1] = 0xCD;
            write_slot(slot, &data);
            let mut out = alloc::vec![0u8; SLOT_SIZE];
            read_slot(slot, &mut out);
            assert_eq!(out, data);
            deallocate_slot(slot);
            let mut after_free = alloc::vec![0xFFu8; SLOT_SIZE];
            read_slot(slot, &mut after_free);
            assert!(after_free.iter().all(|&b| b == 0), "freed slot's contents should not leak");
        });
    }
}
