//! Per-address-space virtual memory region registry (component J's data
//! model half; `virtual_mem` owns the hardware page-table half).
//!
//! Tracks every mapped region for each address space in a
//! `BTreeMap<u32, Region>` keyed by start address, giving first-fit gap
//! search for new mappings, split-on-partial-unmap, deep-clone for fork,
//! and bulk cleanup on process exit.

use crate::memory::address::PhysAddr;
use crate::sync::spinlock::Spinlock;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Start of the general-purpose (mmap-style) region of user address space.
pub const USER_MMAP_BASE: u32 = 0x7000_0000;
/// End (exclusive) of the user address space.
pub const USER_LIMIT: u32 = 0xBF00_0000;
/// Below this address, a fixed-address mapping request is always invalid
/// (reserved for the null-page guard and low-memory identity mappings).
pub const USER_BASE: u32 = 0x0040_0000;

pub const VM_READ: u32 = 1 << 0;
pub const VM_WRITE: u32 = 1 << 1;
pub const VM_EXEC: u32 = 1 << 2;
pub const VM_USER: u32 = 1 << 3;
pub const VM_COW: u32 = 1 << 4;
pub const VM_IN_RAM: u32 = 1 << 5;
pub const VM_FILE_BACKED: u32 = 1 << 6;
pub const VM_LOCKED: u32 = 1 << 7;

/// Where a not-currently-resident page's data lives.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Purely anonymous memory with no swap slot recorded yet (a fresh
    /// demand-zero page).
    None,
    /// Evicted to this swap slot index.
    Swap(usize),
    /// Backed by a vnode at this byte offset (demand-paged from a file).
    File { vnode_id: u32, offset: u64 },
}

/// A single contiguous mapped region in a virtual address space.
#[derive(Clone)]
pub struct Region {
    pub start: u32,
    pub size: u32,
    pub flags: u32,
    pub backing: Backing,
}

impl Region {
    pub fn end(&self) -> u32 {
        self.start + self.size
    }
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end()
    }
}

struct AddressSpaceRegions {
    pd: PhysAddr,
    regions: BTreeMap<u32, Region>,
    mmap_hint: u32,
}

static REGISTRY: Spinlock<Vec<AddressSpaceRegions>> = Spinlock::new(Vec::new());

pub fn init_process(pd: PhysAddr, mmap_hint: u32) {
    let mut reg = REGISTRY.lock();
    if reg.iter().any(|p| p.pd == pd) {
        return;
    }
    reg.push(AddressSpaceRegions { pd, regions: BTreeMap::new(), mmap_hint: mmap_hint.max(USER_MMAP_BASE) });
}

/// Insert a region at a specific address (used for fixed mappings such
/// as the kernel stack or an exec image's segments).
pub fn insert_fixed(pd: PhysAddr, start: u32, size: u32, flags: u32, backing: Backing) {
    let mut reg = REGISTRY.lock();
    if let Some(proc) = reg.iter_mut().find(|p| p.pd == pd) {
        proc.regions.insert(start, Region { start, size, flags, backing });
    }
}

/// Allocate `size` bytes somewhere in the mmap region via first-fit gap
/// search starting at the space's allocation hint, wrapping once.
pub fn alloc_region(pd: PhysAddr, size: u32, flags: u32) -> Option<u32> {
    if size == 0 {
        return None;
    }
    let mut reg = REGISTRY.lock();
    let proc = reg.iter_mut().find(|p| p.pd == pd)?;

    if let Some(addr) = find_gap(&proc.regions, proc.mmap_hint, size) {
        proc.regions.insert(addr, Region { start: addr, size, flags, backing: Backing::None });
        proc.mmap_hint = addr + size;
        return Some(addr);
    }
    if proc.mmap_hint > USER_MMAP_BASE {
        if let Some(addr) = find_gap(&proc.regions, USER_MMAP_BASE, size) {
            proc.regions.insert(addr, Region { start: addr, size, flags, backing: Backing::None });
            proc.mmap_hint = addr + size;
            return Some(addr);
        }
    }
    None
}

/// Remove (or split) the portion of any regions overlapping
/// `[addr, addr+size)`.
pub fn free_region(pd: PhysAddr, addr: u32, size: u32) {
    if size == 0 {
        return;
    }
    let mut reg = REGISTRY.lock();
    let proc = match reg.iter_mut().find(|p| p.pd == pd) {
        Some(p) => p,
        None => return,
    };
    let free_end = addr + size;
    let overlapping: Vec<u32> = proc
        .regions
        .range(..free_end)
        .filter(|(_, v)| v.end() > addr)
        .map(|(&k, _)| k)
        .collect();

    for key in overlapping {
        let region = match proc.regions.remove(&key) {
            Some(v) => v,
            None => continue,
        };
        let region_end = region.end();
        if region.start < addr {
            proc.regions.insert(
                region.start,
                Region { start: region.start, size: addr - region.start, flags: region.flags, backing: region.backing },
            );
        }
        if region_end > free_end {
            proc.regions.insert(
                free_end,
                Region { start: free_end, size: region_end - free_end, flags: region.flags, backing: region.backing },
            );
        }
    }
}

/// Find the region containing `addr`, if any.
pub fn find_region(pd: PhysAddr, addr: u32) -> Option<Region> {
    let reg = REGISTRY.lock();
    let proc = reg.iter().find(|p| p.pd == pd)?;
    proc.regions.values().find(|r| r.contains(addr)).cloned()
}

/// Mutate the region containing `addr` in place.
pub fn update_region(pd: PhysAddr, addr: u32, f: impl FnOnce(&mut Region)) {
    let mut reg = REGISTRY.lock();
    if let Some(proc) = reg.iter_mut().find(|p| p.pd == pd) {
        if let Some(region) = proc.regions.values_mut().find(|r| r.contains(addr)) {
            f(region);
        }
    }
}

/// Deep-copy every region from `src_pd` into `dst_pd` (used by fork).
pub fn clone_for_fork(src_pd: PhysAddr, dst_pd: PhysAddr) {
    let mut reg = REGISTRY.lock();
    let (cloned, hint) = match reg.iter().find(|p| p.pd == src_pd) {
        Some(src) => (src.regions.clone(), src.mmap_hint),
        None => (BTreeMap::new(), USER_MMAP_BASE),
    };
    reg.retain(|p| p.pd != dst_pd);
    reg.push(AddressSpaceRegions { pd: dst_pd, regions: cloned, mmap_hint: hint });
}

/// Drop every region for a terminated address space.
pub fn destroy_process(pd: PhysAddr) {
    let mut reg = REGISTRY.lock();
    reg.retain(|p| p.pd != pd);
}

/// Reset a space's user regions to empty (used by exec).
pub fn reset_user_regions(pd: PhysAddr) {
    let mut reg = REGISTRY.lock();
    if let Some(proc) = reg.iter_mut().find(|p| p.pd == pd) {
        proc.regions.clear();
        proc.mmap_hint = USER_MMAP_BASE;
    }
}

fn find_gap(regions: &BTreeMap<u32, Region>, start_from: u32, size: u32) -> Option<u32> {
    let mut cursor = start_from.max(USER_MMAP_BASE);
    for region in regions.values() {
        let region_end = region.end();
        if region_end <= cursor {
            continue;
        }
        if region.start > cursor && region.start - cursor >= size {
            return Some(cursor);
        }
        cursor = cursor.max(region_end);
    }
    if USER_LIMIT > cursor && USER_LIMIT - cursor >= size {
        Some(cursor)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_search_avoids_existing_regions() {
        let pd = PhysAddr::new(0x1000);
        init_process(pd, USER_MMAP_BASE);
        let a = alloc_region(pd, 0x1000, VM_READ | VM_WRITE).unwrap();
        let b = alloc_region(pd, 0x1000, VM_READ | VM_WRITE).unwrap();
        assert_ne!(a, b);
        assert!(b >= a + 0x1000 || a >= b + 0x1000);
        destroy_process(pd);
    }

    #[test]
    fn free_region_splits_overlap() {
        let pd = PhysAddr::new(0x2000);
        init_process(pd, USER_MMAP_BASE);
        let start = alloc_region(pd, 0x3000, VM_READ).unwrap();
        free_region(pd, start + 0x1000, 0x1000);
        assert!(find_region(pd, start).is_some());
        assert!(find_region(pd, start + 0x1000).is_none());
        assert!(find_region(pd, start + 0x2000).is_some());
        destroy_process(pd);
    }
}
