//! Physical frame allocator (component B): a bitmap over every 4 KiB
//! frame up to 1 GiB of RAM, seeded from the bootloader's memory map.
//!
//! Grounded on the original detector's handling of the low 1 MiB and the
//! kernel image: both are carved out of the free list regardless of what
//! the memory map reports, since nothing may allocate over the running
//! kernel or legacy BIOS/bootloader structures.

use crate::boot_info::{BootInfo, E820_TYPE_USABLE};
use crate::memory::address::PhysAddr;
use crate::memory::FRAME_SIZE;
use crate::sync::spinlock::Spinlock;

/// Maximum supported physical memory (1 GiB).
const MAX_MEMORY: usize = 1024 * 1024 * 1024;
const MAX_FRAMES: usize = MAX_MEMORY / FRAME_SIZE;
const BITMAP_SIZE: usize = MAX_FRAMES / 8;

/// Virtual base the kernel image is linked at (higher-half mapping).
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;

struct Bitmap {
    bits: [u8; BITMAP_SIZE],
    total_frames: usize,
    free_frames: usize,
}

impl Bitmap {
    fn set_used(&mut self, frame: usize) {
        self.bits[frame / 8] |= 1 << (frame % 8);
    }
    fn set_free(&mut self, frame: usize) {
        self.bits[frame / 8] &= !(1 << (frame % 8));
    }
    fn is_used(&self, frame: usize) -> bool {
        self.bits[frame / 8] & (1 << (frame % 8)) != 0
    }
}

static STATE: Spinlock<Bitmap> = Spinlock::new_at(
    Bitmap { bits: [0xFFu8; BITMAP_SIZE], total_frames: 0, free_frames: 0 },
    crate::irql::IRQL_SCHEDULER,
);

/// Initialize the frame allocator from the boot-info memory map. Marks
/// usable regions free, then re-reserves the first 1 MiB and the kernel
/// image's own physical footprint.
pub fn init(boot_info: &BootInfo) {
    let memory_map = unsafe { boot_info.memory_map() };

    let mut max_addr: u64 = 0;
    for entry in memory_map {
        let end = entry.base_addr + entry.length;
        if end > max_addr {
            max_addr = end;
        }
    }
    if max_addr > MAX_MEMORY as u64 {
        max_addr = MAX_MEMORY as u64;
    }

    let mut state = STATE.lock();
    state.total_frames = (max_addr as usize) / FRAME_SIZE;
    state.free_frames = 0;

    for entry in memory_map {
        if entry.entry_type != E820_TYPE_USABLE {
            continue;
        }
        let start = PhysAddr::new(entry.base_addr.min(u32::MAX as u64) as u32).frame_align_up();
        let end_addr = (entry.base_addr + entry.length).min(u32::MAX as u64) as u32;
        let end = PhysAddr::new(end_addr).frame_align_down();
        if start.as_u32() >= end.as_u32() {
            continue;
        }
        for frame in start.frame_index()..end.frame_index() {
            if frame < MAX_FRAMES && state.is_used(frame) {
                state.set_free(frame);
                state.free_frames += 1;
            }
        }
    }

    // Reserve the low 1 MiB unconditionally (BIOS data area, bootloader).
    let first_mb_frames = (1024 * 1024) / FRAME_SIZE;
    for frame in 0..first_mb_frames {
        if !state.is_used(frame) {
            state.set_used(frame);
            state.free_frames -= 1;
        }
    }

    // Reserve the kernel image itself.
    let kernel_start = PhysAddr::new(boot_info.kernel_phys_start).frame_align_down();
    let kernel_end = PhysAddr::new(boot_info.kernel_phys_end).frame_align_up();
    crate::serial_println!(
        "reserving kernel region: {:#010x} - {:#010x}",
        kernel_start.as_u32(),
        kernel_end.as_u32()
    );
    for frame in kernel_start.frame_index()..kernel_end.frame_index() {
        if frame < MAX_FRAMES && !state.is_used(frame) {
            state.set_used(frame);
            state.free_frames -= 1;
        }
    }

    crate::serial_println!(
        "physical memory: {} MiB total, {} MiB free",
        state.total_frames * FRAME_SIZE / (1024 * 1024),
        state.free_frames * FRAME_SIZE / (1024 * 1024)
    );
}

/// Allocate a single frame. First-fit linear scan of the bitmap.
pub fn alloc_frame() -> Option<PhysAddr> {
    let mut state = STATE.lock();
    let total = state.total_frames;
    for i in 0..total {
        if !state.is_used(i) {
            state.set_used(i);
            state.free_frames -= 1;
            return Some(PhysAddr::new((i * FRAME_SIZE) as u32));
        }
    }
    None
}

/// Free a previously allocated frame.
pub fn free_frame(addr: PhysAddr) {
    let mut state = STATE.lock();
    let frame = addr.frame_index();
    if state.is_used(frame) {
        state.set_free(frame);
        state.free_frames += 1;
    }
}

pub fn free_frame_count() -> usize {
    STATE.lock().free_frames
}

pub fn total_frames() -> usize {
    STATE.lock().total_frames
}

/// Allocate `count` physically contiguous frames (first-fit run search).
pub fn alloc_contiguous(count: usize) -> Option<PhysAddr> {
    if count == 0 {
        return None;
    }
    let mut state = STATE.lock();
    let total = state.total_frames;
    let mut run_start = 0usize;
    let mut run_len = 0usize;
    for i in 0..total {
        if !state.is_used(i) {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len >= count {
                for j in run_start..run_start + count {
                    state.set_used(j);
                    state.free_frames -= 1;
                }
                return Some(PhysAddr::new((run_start * FRAME_SIZE) as u32));
            }
        } else {
            run_len = 0;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let mut state = STATE.lock();
        state.total_frames = 16;
        state.free_frames = 0;
        for i in 0..16 {
            state.set_used(i);
        }
        state.set_free(3);
        state.free_frames = 1;
        drop(state);

        let f = alloc_frame().expect("frame 3 should be free");
        assert_eq!(f.as_u32(), 3 * FRAME_SIZE as u32);
        assert_eq!(free_frame_count(), 0);
        free_frame(f);
        assert_eq!(free_frame_count(), 1);
    }
}
