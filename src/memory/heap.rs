//! Kernel heap allocator (component C): a linked-list free list over a
//! demand-paged virtual range, backed by component B (physical frames)
//! and component J (the page-fault handler resolves each page the first
//! time it's touched, exactly as it would for an anonymous user region).
//!
//! The lock disables interrupts while held: the timer ISR can run
//! `scheduler::drain_sleep_queue` and free a terminated thread's kernel
//! stack, and that must never re-enter the allocator while a preempted
//! thread is mid-allocation.

use crate::memory::vma::{self, Backing};
use crate::memory::{physical, virtual_mem};
use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Virtual address where the kernel heap begins. Well above the kernel
/// image's own higher-half mapping and well below the top-8 MiB window
/// reserved for recursive page-table access.
const HEAP_START: u32 = 0xD000_0000;
/// Initial committed size (16 MiB — rest is demand-paged on first access
/// to whatever the watermark has grown to).
const HEAP_INITIAL_SIZE: usize = 16 * 1024 * 1024;
/// Maximum heap size (256 MiB).
const HEAP_MAX_SIZE: usize = 256 * 1024 * 1024;
/// Minimum growth increment when expanding the heap.
const GROW_CHUNK: usize = 4 * 1024 * 1024;

/// Committed heap size in bytes. Addresses in `[HEAP_START, HEAP_START +
/// HEAP_COMMITTED)` are registered with the VM region registry; the page
/// fault handler allocates a frame the first time one is touched.
pub static HEAP_COMMITTED: AtomicUsize = AtomicUsize::new(0);

#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap = LockedHeap::new();

struct LockedHeap {
    lock: core::sync::atomic::AtomicBool,
}

/// Header for a free block in the linked-list free list, stored in-place
/// at the start of each free region. Kept sorted by address so adjacent
/// blocks can be coalesced on free.
#[repr(C)]
struct FreeBlock {
    size: usize,
    next: *mut FreeBlock,
}

static mut HEAP_FREE_LIST: *mut FreeBlock = core::ptr::null_mut();
static mut HEAP_INITIALIZED: bool = false;

impl LockedHeap {
    const fn new() -> Self {
        LockedHeap { lock: core::sync::atomic::AtomicBool::new(false) }
    }

    fn acquire(&self) -> u32 {
        let saved = crate::arch::hal::save_and_disable_interrupts();
        let mut spin_count: u32 = 0;
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
            spin_count += 1;
            if spin_count == 10_000_000 {
                crate::serial_println!("!!! HEAP_LOCK TIMEOUT");
                spin_count = 0;
            }
        }
        saved
    }

    fn release(&self, saved: u32) {
        self.lock.store(false, Ordering::Release);
        crate::arch::hal::restore_interrupt_state(saved);
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !HEAP_INITIALIZED {
            return core::ptr::null_mut();
        }

        let flags = self.acquire();
        let mut result = alloc_inner(layout);
        if result.is_null() {
            let needed = align_up(layout.size().max(core::mem::size_of::<FreeBlock>()), layout.align().max(16));
            if grow_heap(needed) {
                result = alloc_inner(layout);
            }
        }
        self.release(flags);
        result
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let flags = self.acquire();
        dealloc_inner(ptr, layout);
        self.release(flags);
    }
}

/// Check if the heap lock is currently held (lock-free diagnostic, used
/// by the timer heartbeat to detect a heap stuck inside a deadlock chain).
#[inline]
pub fn is_heap_locked() -> bool {
    HEAP_ALLOCATOR.lock.load(Ordering::Relaxed)
}

#[inline]
fn is_in_heap(addr: usize) -> bool {
    let start = HEAP_START as usize;
    let end = start + HEAP_COMMITTED.load(Ordering::Relaxed);
    addr >= start && addr < end
}

unsafe fn alloc_inner(layout: Layout) -> *mut u8 {
    let size = align_up(layout.size().max(core::mem::size_of::<FreeBlock>()), layout.align().max(16));

    const MAX_ITER: usize = 100_000;
    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = HEAP_FREE_LIST;
    let mut iter = 0usize;

    while !current.is_null() {
        iter += 1;
        if iter > MAX_ITER || !is_in_heap(current as usize) {
            return core::ptr::null_mut();
        }

        let block_size = (*current).size;
        if block_size >= size {
            if block_size >= size + core::mem::size_of::<FreeBlock>() + 8 {
                let new_block = (current as *mut u8).add(size) as *mut FreeBlock;
                (*new_block).size = block_size - size;
                (*new_block).next = (*current).next;
                if prev.is_null() {
                    HEAP_FREE_LIST = new_block;
                } else {
                    (*prev).next = new_block;
                }
            } else if prev.is_null() {
                HEAP_FREE_LIST = (*current).next;
            } else {
                (*prev).next = (*current).next;
            }
            return current as *mut u8;
        }

        prev = current;
        current = (*current).next;
    }

    core::ptr::null_mut()
}

/// Grow the heap by advancing the committed watermark and registering
/// the new range with the VM region registry. No physical frame is
/// allocated here — the first touch faults it in.
unsafe fn grow_heap(min_bytes: usize) -> bool {
    let growth = align_up(min_bytes.max(GROW_CHUNK), crate::memory::FRAME_SIZE);
    let current_committed = HEAP_COMMITTED.load(Ordering::Acquire);

    let new_committed = current_committed + growth;
    if new_committed > HEAP_MAX_SIZE {
        let remaining = HEAP_MAX_SIZE.saturating_sub(current_committed);
        if remaining < min_bytes {
            return false;
        }
        return grow_heap_exact(remaining);
    }

    let pages_needed = growth / crate::memory::FRAME_SIZE;
    if physical::free_frame_count() < pages_needed + 256 {
        let available = physical::free_frame_count().saturating_sub(256);
        if available * crate::memory::FRAME_SIZE < min_bytes {
            return false;
        }
        return grow_heap_exact(available * crate::memory::FRAME_SIZE);
    }

    grow_heap_exact(growth)
}

unsafe fn grow_heap_exact(growth: usize) -> bool {
    let growth = align_up(growth, crate::memory::FRAME_SIZE);
    if growth == 0 {
        return false;
    }

    let old_committed = HEAP_COMMITTED.load(Ordering::Acquire);
    let base = HEAP_START + old_committed as u32;
    vma::insert_fixed(virtual_mem::current_pd(), base, growth as u32, vma::VM_WRITE | vma::VM_LOCKED, Backing::None);
    HEAP_COMMITTED.store(old_committed + growth, Ordering::Release);

    let new_block = base as *mut FreeBlock;
    (*new_block).size = growth;

    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = HEAP_FREE_LIST;
    while !current.is_null() && (current as u32) < base {
        prev = current;
        current = (*current).next;
    }

    (*new_block).next = current;
    if prev.is_null() {
        HEAP_FREE_LIST = new_block;
    } else {
        (*prev).next = new_block;
    }

    if !prev.is_null() && (prev as *mut u8).add((*prev).size) == new_block as *mut u8 {
        (*prev).size += (*new_block).size;
        (*prev).next = (*new_block).next;
        if !(*prev).next.is_null() {
            let next = (*prev).next;
            if (prev as *mut u8).add((*prev).size) == next as *mut u8 {
                (*prev).size += (*next).size;
                (*prev).next = (*next).next;
            }
        }
    } else if !(*new_block).next.is_null() {
        let next = (*new_block).next;
        if (new_block as *mut u8).add((*new_block).size) == next as *mut u8 {
            (*new_block).size += (*next).size;
            (*new_block).next = (*next).next;
        }
    }

    true
}

unsafe fn dealloc_inner(ptr: *mut u8, layout: Layout) {
    let size = align_up(layout.size().max(core::mem::size_of::<FreeBlock>()), layout.align().max(16));
    if !is_in_heap(ptr as usize) {
        return;
    }

    let block = ptr as *mut FreeBlock;
    (*block).size = size;

    const MAX_ITER: usize = 100_000;
    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = HEAP_FREE_LIST;
    let mut iter = 0usize;

    while !current.is_null() && (current as usize) < (block as usize) {
        iter += 1;
        if iter > MAX_ITER || !is_in_heap(current as usize) {
            (*block).next = HEAP_FREE_LIST;
            HEAP_FREE_LIST = block;
            return;
        }
        if current == block {
            return;
        }
        prev = current;
        current = (*current).next;
    }

    (*block).next = current;
    if prev.is_null() {
        HEAP_FREE_LIST = block;
    } else {
        (*prev).next = block;
    }

    if !(*block).next.is_null() {
        let next = (*block).next;
        if (block as *mut u8).add((*block).size) == next as *mut u8 {
            (*block).size += (*next).size;
            (*block).next = (*next).next;
        }
    }
    if !prev.is_null() && (prev as *mut u8).add((*prev).size) == block as *mut u8 {
        (*prev).size += (*block).size;
        (*prev).next = (*block).next;
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Returns `(used_bytes, total_committed_bytes)` for the kernel heap.
pub fn heap_stats() -> (usize, usize) {
    unsafe {
        let flags = HEAP_ALLOCATOR.acquire();
        let committed = HEAP_COMMITTED.load(Ordering::Acquire);
        let mut total_free = 0usize;
        let mut current = HEAP_FREE_LIST;
        while !current.is_null() {
            if !is_in_heap(current as usize) {
                break;
            }
            total_free += (*current).size;
            current = (*current).next;
        }
        HEAP_ALLOCATOR.release(flags);
        (committed.saturating_sub(total_free), committed)
    }
}

/// Walk the free list checking for corruption, printing the result.
pub fn validate_heap() {
    unsafe {
        let flags = HEAP_ALLOCATOR.acquire();
        let mut current = HEAP_FREE_LIST;
        let mut prev_end: usize = 0;
        let mut total_free = 0usize;
        let mut count = 0usize;
        let heap_start = HEAP_START as usize;
        let heap_end = heap_start + HEAP_COMMITTED.load(Ordering::Acquire);

        while !current.is_null() {
            let addr = current as usize;
            let size = (*current).size;

            if addr < heap_start || addr >= heap_end {
                crate::serial_println!("HEAP CORRUPT: block #{} at {:#x} outside heap bounds", count, addr);
                HEAP_ALLOCATOR.release(flags);
                return;
            }
            if size == 0 || addr + size > heap_end {
                crate::serial_println!("HEAP CORRUPT: block #{} at {:#x} size {:#x} extends past heap end", count, addr, size);
                HEAP_ALLOCATOR.release(flags);
                return;
            }
            if addr < prev_end {
                crate::serial_println!("HEAP CORRUPT: block #{} at {:#x} overlaps previous ending at {:#x}", count, addr, prev_end);
                HEAP_ALLOCATOR.release(flags);
                return;
            }

            total_free += size;
            prev_end = addr + size;
            count += 1;
            current = (*current).next;

            if count > 10_000 {
                crate::serial_println!("HEAP CORRUPT: free list has >10000 entries (loop?)");
                HEAP_ALLOCATOR.release(flags);
                return;
            }
        }

        crate::serial_println!(
            "heap check: {} free block(s), {} KiB free / {} KiB committed",
            count, total_free / 1024, HEAP_COMMITTED.load(Ordering::Acquire) / 1024
        );
        HEAP_ALLOCATOR.release(flags);
    }
}

/// Commit the initial heap range and register it as a single free block.
/// Must be called after physical and virtual memory are initialized.
pub fn init() {
    vma::insert_fixed(virtual_mem::current_pd(), HEAP_START, HEAP_INITIAL_SIZE as u32, vma::VM_WRITE | vma::VM_LOCKED, Backing::None);
    HEAP_COMMITTED.store(HEAP_INITIAL_SIZE, Ordering::Release);

    unsafe {
        let block = HEAP_START as *mut FreeBlock;
        (*block).size = HEAP_INITIAL_SIZE;
        (*block).next = core::ptr::null_mut();
        HEAP_FREE_LIST = block;
        HEAP_INITIALIZED = true;
    }

    crate::serial_println!(
        "kernel heap initialized: {:#010x} - {:#010x} ({} KiB committed, max {} MiB)",
        HEAP_START,
        HEAP_START + HEAP_INITIAL_SIZE as u32,
        HEAP_INITIAL_SIZE / 1024,
        HEAP_MAX_SIZE / (1024 * 1024)
    );
}
