//! Virtual memory manager using two-level x86 paging with recursive mapping.
//!
//! Each process owns a page directory (PD); user mappings live in
//! `vma::Region`s tracked separately, with actual page table entries
//! (PTEs) installed lazily by the page-fault handler. The kernel half of
//! every PD is identical (copied from a template at creation time), so
//! kernel code and the IDT/ISR stubs stay mapped no matter which address
//! space is loaded.
//!
//! A single page directory entry (1023, the last one) is a recursive
//! self-map: it lets the currently loaded PD's own tables be addressed
//! as ordinary memory without a dedicated mapping window. Editing a PD
//! that belongs to a *different*, not-currently-loaded address space
//! (fork, exec, or anything touching another process's tables) goes
//! through [`with_other_pd`], which borrows a single reserved kernel
//! window page to make the foreign frame visible temporarily.

use crate::errno::Errno;
use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::vma::{self, Backing, Region};
use crate::memory::{physical, FRAME_SIZE};
use crate::sync::spinlock::Spinlock;
use alloc::collections::BTreeMap;

const PAGE_PRESENT: u32 = 1 << 0;
const PAGE_WRITABLE: u32 = 1 << 1;
const PAGE_USER: u32 = 1 << 2;
const ADDR_MASK: u32 = 0xFFFF_F000;
const ENTRIES_PER_TABLE: usize = 1024;

/// PDE/PTE index of the recursive self-map and the temp edit window.
const RECURSIVE_INDEX: usize = 1023;
const WINDOW_INDEX: usize = 1022;

const RECURSIVE_PD_VADDR: u32 = 0xFFFF_F000;
// PDE 1022, page-table index 0 — so its sole PTE sits at word offset 0
// of that PDE's recursively-addressed page table, letting
// `window_pte_ptr` skip computing a page-table-index offset.
const WINDOW_VADDR: u32 = 0xFF80_0000;

fn recursive_pt_vaddr(pdi: usize) -> u32 {
    0xFFC0_0000 | ((pdi as u32) << 12)
}

static KERNEL_PD: Spinlock<Option<PhysAddr>> = Spinlock::new_at(None, crate::irql::IRQL_SCHEDULER);
static WINDOW_LOCK: Spinlock<()> = Spinlock::new_at((), crate::irql::IRQL_SCHEDULER);
static FRAME_REFCOUNTS: Spinlock<BTreeMap<usize, u32>> = Spinlock::new_at(BTreeMap::new(), crate::irql::IRQL_SCHEDULER);

/// Bring up the recursive mapping on the page directory the bootloader
/// left active, then stash it as the template every new address space
/// is cloned from.
pub fn init() {
    let pd_phys = crate::arch::hal::current_page_table();
    let pd_ptr = pd_phys as *mut u32;
    unsafe {
        *pd_ptr.add(RECURSIVE_INDEX) = (pd_phys & ADDR_MASK) | PAGE_PRESENT | PAGE_WRITABLE;
    }

    let window_pt = physical::alloc_frame().expect("no frame for temp window page table");
    unsafe {
        core::ptr::write_bytes(window_pt.as_u32() as *mut u8, 0, FRAME_SIZE);
        *pd_ptr.add(WINDOW_INDEX) = (window_pt.as_u32() & ADDR_MASK) | PAGE_PRESENT | PAGE_WRITABLE;
    }
    crate::arch::hal::flush_tlb(RECURSIVE_PD_VADDR);

    *KERNEL_PD.lock() = Some(PhysAddr::new(pd_phys));
    vma::init_process(PhysAddr::new(pd_phys), vma::USER_MMAP_BASE);
    crate::serial_println!("virtual_mem: recursive paging initialized, kernel pd={:#010x}", pd_phys);
}

/// Physical address of the page directory currently loaded on this CPU.
pub fn current_pd() -> PhysAddr {
    PhysAddr::new(crate::arch::hal::current_page_table())
}

fn window_pte_ptr() -> *mut u32 {
    recursive_pt_vaddr(WINDOW_INDEX) as *mut u32
}

/// Make a physical frame belonging to *any* address space (not
/// necessarily the one currently loaded) visible at [`WINDOW_VADDR`] in
/// the currently loaded one, for the duration of `f`.
fn with_foreign_frame<R>(phys: PhysAddr, f: impl FnOnce(*mut u32) -> R) -> R {
    let _guard = WINDOW_LOCK.lock();
    unsafe {
        *window_pte_ptr() = (phys.as_u32() & ADDR_MASK) | PAGE_PRESENT | PAGE_WRITABLE;
    }
    crate::arch::hal::flush_tlb(WINDOW_VADDR);
    let result = f(WINDOW_VADDR as *mut u32);
    unsafe {
        *window_pte_ptr() = 0;
    }
    crate::arch::hal::flush_tlb(WINDOW_VADDR);
    result
}

/// Create a fresh address space: a new PD whose kernel half (PDEs
/// 768..1023, i.e. the `0xC0000000`+ range) is copied from the template,
/// recursive and window slots pointing at the new PD's own frame, and
/// an empty user half.
pub fn create_address_space() -> PhysAddr {
    let new_pd_phys = physical::alloc_frame().expect("out of memory creating address space");
    let template = KERNEL_PD.lock().expect("virtual_mem not initialized");

    with_foreign_frame(new_pd_phys, |window| unsafe {
        core::ptr::write_bytes(window as *mut u8, 0, FRAME_SIZE);
    });

    with_foreign_frame(template, |template_window| {
        let template_pd = template_window as *const u32;
        with_foreign_frame(new_pd_phys, |new_window| unsafe {
            let new_pd = new_window;
            for i in 768..ENTRIES_PER_TABLE {
                if i == RECURSIVE_INDEX || i == WINDOW_INDEX {
                    continue;
                }
                *new_pd.add(i) = *template_pd.add(i);
            }
            *new_pd.add(RECURSIVE_INDEX) = (new_pd_phys.as_u32() & ADDR_MASK) | PAGE_PRESENT | PAGE_WRITABLE;
            *new_pd.add(WINDOW_INDEX) = *template_pd.add(WINDOW_INDEX);
        });
    });

    vma::init_process(new_pd_phys, vma::USER_MMAP_BASE);
    new_pd_phys
}

/// Tear down every user-half mapping and free the PD frame itself.
/// Called when a process exits.
pub fn destroy_address_space(pd: PhysAddr) {
    for (_, region) in vma_snapshot(pd) {
        unmap_region_frames(pd, &region);
    }
    vma::destroy_process(pd);
    physical::free_frame(pd);
}

fn vma_snapshot(pd: PhysAddr) -> alloc::vec::Vec<(u32, Region)> {
    let mut out = alloc::vec::Vec::new();
    let mut addr = 0u32;
    loop {
        match vma::find_region(pd, addr) {
            Some(r) => {
                let next = r.end();
                out.push((r.start, r.clone()));
                if next <= addr {
                    break;
                }
                addr = next;
            }
            None => {
                if addr >= vma::USER_LIMIT {
                    break;
                }
                addr += FRAME_SIZE as u32;
                if addr >= vma::USER_LIMIT {
                    break;
                }
            }
        }
    }
    out
}

fn unmap_region_frames(pd: PhysAddr, region: &Region) {
    let mut a = region.start;
    while a < region.end() {
        unmap_page(pd, VirtAddr::new(a));
        a += FRAME_SIZE as u32;
    }
}

/// Read a PDE/PTE pair for `vaddr` in `pd`, operating through the
/// foreign-frame window unless `pd` is already the loaded one.
fn with_pd_tables<R>(pd: PhysAddr, vaddr: VirtAddr, f: impl FnOnce(*mut u32, Option<*mut u32>) -> R) -> R {
    let loaded = current_pd();
    if pd == loaded {
        let pde_ptr = (RECURSIVE_PD_VADDR as *mut u32).wrapping_add(vaddr.page_directory_index());
        let pde = unsafe { *pde_ptr };
        if pde & PAGE_PRESENT == 0 {
            return f(pde_ptr, None);
        }
        let pt_ptr = recursive_pt_vaddr(vaddr.page_directory_index()) as *mut u32;
        f(pde_ptr, Some(pt_ptr))
    } else {
        with_foreign_frame(pd, |pd_window| {
            let pde_ptr = pd_window.wrapping_add(vaddr.page_directory_index());
            let pde = unsafe { *pde_ptr };
            if pde & PAGE_PRESENT == 0 {
                return f(pde_ptr, None);
            }
            let pt_phys = PhysAddr::new(pde & ADDR_MASK);
            with_foreign_frame(pt_phys, |pt_window| f(pde_ptr, Some(pt_window)))
        })
    }
}

fn ensure_page_table(pd: PhysAddr, vaddr: VirtAddr, user: bool) -> *mut u32 {
    with_pd_tables(pd, vaddr, |pde_ptr, pt| {
        if let Some(pt) = pt {
            return pt.wrapping_add(vaddr.page_table_index());
        }
        let new_pt = physical::alloc_frame().expect("out of memory allocating page table");
        with_foreign_frame(new_pt, |window| unsafe {
            core::ptr::write_bytes(window as *mut u8, 0, FRAME_SIZE);
        });
        let mut flags = PAGE_PRESENT | PAGE_WRITABLE;
        if user {
            flags |= PAGE_USER;
        }
        unsafe { *pde_ptr = (new_pt.as_u32() & ADDR_MASK) | flags };
        crate::arch::hal::flush_tlb(vaddr.as_u32());
        // Recurse now that the PDE is installed; the PT is guaranteed present.
        with_pd_tables(pd, vaddr, |_, pt| pt.unwrap().wrapping_add(vaddr.page_table_index()))
    })
}

/// Install (or replace) a single present PTE.
pub fn map_page(pd: PhysAddr, vaddr: VirtAddr, phys: PhysAddr, flags: u32) {
    let user = flags & vma::VM_USER != 0;
    let pte_ptr = ensure_page_table(pd, vaddr, user);
    let mut pte_flags = PAGE_PRESENT;
    if flags & vma::VM_WRITE != 0 && flags & vma::VM_COW == 0 {
        pte_flags |= PAGE_WRITABLE;
    }
    if user {
        pte_flags |= PAGE_USER;
    }
    unsafe { *pte_ptr = (phys.as_u32() & ADDR_MASK) | pte_flags };
    if pd == current_pd() {
        crate::arch::hal::flush_tlb(vaddr.as_u32());
    }
}

/// Clear a PTE if present, freeing or unsharing the backing frame.
/// Returns the physical frame that was mapped there, if any.
pub fn unmap_page(pd: PhysAddr, vaddr: VirtAddr) -> Option<PhysAddr> {
    let result = with_pd_tables(pd, vaddr, |_, pt| {
        let pt = pt?;
        let pte_ptr = pt.wrapping_add(vaddr.page_table_index());
        let pte = unsafe { *pte_ptr };
        if pte & PAGE_PRESENT == 0 {
            return None;
        }
        unsafe { *pte_ptr = 0 };
        Some(PhysAddr::new(pte & ADDR_MASK))
    });
    if let Some(phys) = result {
        if pd == current_pd() {
            crate::arch::hal::flush_tlb(vaddr.as_u32());
        }
        release_frame(phys);
    }
    result
}

fn share_frame(frame: PhysAddr) {
    let mut counts = FRAME_REFCOUNTS.lock();
    let entry = counts.entry(frame.frame_index()).or_insert(1);
    *entry += 1;
}

/// Drop one reference to a (possibly COW-shared) frame, freeing it back
/// to the physical allocator once the last reference is gone.
fn release_frame(frame: PhysAddr) {
    let mut counts = FRAME_REFCOUNTS.lock();
    match counts.get_mut(&frame.frame_index()) {
        Some(count) if *count > 1 => {
            *count -= 1;
        }
        Some(_) => {
            counts.remove(&frame.frame_index());
            drop(counts);
            physical::free_frame(frame);
        }
        None => {
            drop(counts);
            physical::free_frame(frame);
        }
    }
}

/// The `FIXED` request flag: place the mapping exactly at the requested
/// address rather than letting the allocator choose.
pub const MAP_FIXED: u32 = 1 << 16;

/// Reserve a VM region and, for eagerly-backed requests, install its
/// mappings immediately. Anonymous, non-fixed regions are left entirely
/// unmapped (demand paging fills them in on first fault).
///
/// `addr_hint` with [`MAP_FIXED`] set and an address below
/// [`vma::USER_BASE`] is always rejected: that range is reserved for the
/// null-page guard and low-memory identity mappings.
pub fn map_virt(
    pd: PhysAddr,
    addr_hint: u32,
    size: u32,
    flags: u32,
    backing: Backing,
) -> Result<u32, Errno> {
    if size == 0 {
        return Err(crate::errno::EINVAL);
    }
    let size = (size as usize + FRAME_SIZE - 1) as u32 & !(FRAME_SIZE as u32 - 1);

    let start = if flags & MAP_FIXED != 0 {
        if addr_hint < vma::USER_BASE {
            return Err(crate::errno::EINVAL);
        }
        vma::free_region(pd, addr_hint, size);
        vma::insert_fixed(pd, addr_hint, size, flags, backing);
        addr_hint
    } else {
        vma::alloc_region(pd, size, flags).ok_or(crate::errno::ENOMEM)?
    };

    if let Backing::None = backing {
        if flags & vma::VM_LOCKED == 0 {
            return Ok(start);
        }
    }

    // Eagerly populate locked or explicitly-backed-with-a-frame regions.
    let mut a = start;
    while a < start + size {
        match backing {
            Backing::None => {
                let frame = physical::alloc_frame().ok_or(crate::errno::ENOMEM)?;
                zero_frame(frame);
                map_page(pd, VirtAddr::new(a), frame, flags);
            }
            _ => {}
        }
        a += FRAME_SIZE as u32;
    }
    Ok(start)
}

/// Release a previously mapped range, unmapping and freeing any present
/// frames and dropping the region record.
pub fn unmap_virt(pd: PhysAddr, addr: u32, size: u32) {
    let size = (size as usize + FRAME_SIZE - 1) as u32 & !(FRAME_SIZE as u32 - 1);
    let mut a = addr;
    while a < addr + size {
        unmap_page(pd, VirtAddr::new(a));
        a += FRAME_SIZE as u32;
    }
    vma::free_region(pd, addr, size);
}

/// Allocate a frame, falling back to evicting one in-RAM anonymous page
/// from `pd` and retrying once if the allocator is out of frames.
fn alloc_frame_or_evict(pd: PhysAddr) -> Option<PhysAddr> {
    if let Some(f) = physical::alloc_frame() {
        return Some(f);
    }
    if evict_page(pd) {
        physical::alloc_frame()
    } else {
        None
    }
}

/// Select one in-RAM, purely anonymous (not file-backed, not already
/// swapped) page belonging to `pd`, write its frame out to a freshly
/// allocated swap slot, and release the frame. Returns `false` if no
/// evictable page was found.
///
/// Picks the first page of the first matching region; a region's
/// `backing`/`VM_IN_RAM` state is tracked per-region rather than
/// per-page (the same approximation [`resolve_anonymous`] and
/// [`resolve_file_backed`] already make), so only a region's first page
/// is considered here.
pub fn evict_page(pd: PhysAddr) -> bool {
    for (_, region) in vma_snapshot(pd) {
        if region.backing != Backing::None || region.flags & vma::VM_IN_RAM == 0 {
            continue;
        }
        let vaddr = VirtAddr::new(region.start);
        let phys = match with_pd_tables(pd, vaddr, |_, pt| {
            pt.and_then(|pt| {
                let pte = unsafe { *pt.wrapping_add(vaddr.page_table_index()) };
                if pte & PAGE_PRESENT != 0 {
                    Some(PhysAddr::new(pte & ADDR_MASK))
                } else {
                    None
                }
            })
        }) {
            Some(p) => p,
            None => continue,
        };

        let slot = crate::memory::swap::allocate_slot();
        with_foreign_frame(phys, |window| {
            let data = unsafe { core::slice::from_raw_parts(window as *const u8, FRAME_SIZE) };
            crate::memory::swap::write_slot(slot, data);
        });
        unmap_page(pd, vaddr);
        vma::update_region(pd, region.start, |r| {
            r.backing = Backing::Swap(slot);
            r.flags &= !vma::VM_IN_RAM;
        });
        return true;
    }
    false
}

/// Change the `VM_READ`/`VM_WRITE`/`VM_EXEC` flags of the region(s)
/// covering `[addr, addr+size)`, flipping the PTE of any page already
/// present so the new permissions take effect immediately rather than
/// only on the next fault. `EINVAL` if any covered page has no region.
pub fn protect(pd: PhysAddr, addr: u32, size: u32, flags: u32) -> Result<(), Errno> {
    if size == 0 {
        return Err(crate::errno::EINVAL);
    }
    let perm_mask = vma::VM_READ | vma::VM_WRITE | vma::VM_EXEC;
    let perm_flags = flags & perm_mask;
    let start = addr & !(FRAME_SIZE as u32 - 1);
    let end = (addr.checked_add(size).ok_or(crate::errno::EINVAL)? + FRAME_SIZE as u32 - 1) & !(FRAME_SIZE as u32 - 1);

    let mut a = start;
    while a < end {
        if vma::find_region(pd, a).is_none() {
            return Err(crate::errno::EINVAL);
        }
        a += FRAME_SIZE as u32;
    }

    let mut a = start;
    while a < end {
        vma::update_region(pd, a, |r| {
            r.flags = (r.flags & !perm_mask) | perm_flags;
        });
        let vaddr = VirtAddr::new(a);
        let present_phys = with_pd_tables(pd, vaddr, |_, pt| {
            pt.and_then(|pt| {
                let pte = unsafe { *pt.wrapping_add(vaddr.page_table_index()) };
                if pte & PAGE_PRESENT != 0 {
                    Some(PhysAddr::new(pte & ADDR_MASK))
                } else {
                    None
                }
            })
        });
        if let Some(phys) = present_phys {
            let region_flags = vma::find_region(pd, a).map(|r| r.flags).unwrap_or(flags);
            map_page(pd, vaddr, phys, region_flags);
        }
        a += FRAME_SIZE as u32;
    }
    Ok(())
}

fn zero_frame(frame: PhysAddr) {
    with_foreign_frame(frame, |window| unsafe {
        core::ptr::write_bytes(window as *mut u8, 0, FRAME_SIZE);
    });
}

fn page_fault_addr(vaddr: u32) -> VirtAddr {
    VirtAddr::new(vaddr & !(FRAME_SIZE as u32 - 1))
}

/// Page fault handler (component J): called from the ISR with the
/// faulting address and the CPU-reported error-code bits decoded.
/// Returns `true` if the fault was resolved and execution may resume;
/// `false` means the fault is genuinely fatal (bad access, unmapped
/// region with no cooperating VMA).
///
/// Resolution order: copy-on-write duplication, file-backed demand
/// paging, anonymous demand paging (from swap or a fresh zero frame).
pub fn handle_page_fault(vaddr: u32, present: bool, write: bool, _user: bool) -> bool {
    let pd = current_pd();
    let page = page_fault_addr(vaddr);

    let region = match vma::find_region(pd, page.as_u32()) {
        Some(r) => r,
        None => return false,
    };

    if present && write && region.flags & vma::VM_COW != 0 {
        return resolve_cow(pd, page, &region);
    }

    if !present {
        match region.backing {
            Backing::File { vnode_id, offset } => return resolve_file_backed(pd, page, &region, vnode_id, offset),
            Backing::Swap(slot) => return resolve_swap_backed(pd, page, &region, slot),
            Backing::None => return resolve_anonymous(pd, page, &region),
        }
    }

    false
}

fn resolve_cow(pd: PhysAddr, page: VirtAddr, region: &Region) -> bool {
    let old_phys = match with_pd_tables(pd, page, |_, pt| {
        pt.map(|pt| PhysAddr::new(unsafe { *pt.wrapping_add(page.page_table_index()) } & ADDR_MASK))
    }) {
        Some(p) => p,
        None => return false,
    };

    let still_shared = FRAME_REFCOUNTS.lock().get(&old_phys.frame_index()).copied().unwrap_or(1) > 1;
    if !still_shared {
        // Sole owner left: just flip the PTE writable in place.
        map_page(pd, page, old_phys, region.flags & !vma::VM_COW);
        vma::update_region(pd, page.as_u32(), |r| r.flags &= !vma::VM_COW);
        return true;
    }

    let new_frame = match physical::alloc_frame() {
        Some(f) => f,
        None => return false,
    };
    with_foreign_frame(old_phys, |src| {
        with_foreign_frame(new_frame, |dst| unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, FRAME_SIZE);
        });
    });
    release_frame(old_phys);
    map_page(pd, page, new_frame, region.flags | vma::VM_WRITE);
    true
}

fn resolve_anonymous(pd: PhysAddr, page: VirtAddr, region: &Region) -> bool {
    let frame = match alloc_frame_or_evict(pd) {
        Some(f) => f,
        None => return false,
    };
    zero_frame(frame);
    map_page(pd, page, frame, region.flags);
    vma::update_region(pd, page.as_u32(), |r| r.flags |= vma::VM_IN_RAM);
    true
}

/// Swap-in: restore a page previously written out by [`evict_page`].
fn resolve_swap_backed(pd: PhysAddr, page: VirtAddr, region: &Region, slot: usize) -> bool {
    let frame = match alloc_frame_or_evict(pd) {
        Some(f) => f,
        None => return false,
    };
    with_foreign_frame(frame, |window| {
        let buf = unsafe { core::slice::from_raw_parts_mut(window as *mut u8, FRAME_SIZE) };
        crate::memory::swap::read_slot(slot, buf);
    });
    crate::memory::swap::deallocate_slot(slot);
    map_page(pd, page, frame, region.flags);
    vma::update_region(pd, page.as_u32(), |r| {
        r.backing = Backing::None;
        r.flags |= vma::VM_IN_RAM;
    });
    true
}

fn resolve_file_backed(pd: PhysAddr, page: VirtAddr, region: &Region, vnode_id: u32, offset: u64) -> bool {
    let frame = match alloc_frame_or_evict(pd) {
        Some(f) => f,
        None => return false,
    };
    zero_frame(frame);
    let read = with_foreign_frame(frame, |window| {
        let buf = unsafe { core::slice::from_raw_parts_mut(window as *mut u8, FRAME_SIZE) };
        crate::fs::vfs::read_vnode_at(vnode_id, offset, buf).unwrap_or(0)
    });
    let _ = read;
    map_page(pd, page, frame, region.flags);
    vma::update_region(pd, page.as_u32(), |r| r.flags |= vma::VM_IN_RAM);
    true
}

/// Mark every writable region in `parent` as copy-on-write in both the
/// parent and the (already-allocated, empty) child address space,
/// sharing the same backing frames. Called once by `fork`.
pub fn fork_cow(parent_pd: PhysAddr, child_pd: PhysAddr) {
    vma::clone_for_fork(parent_pd, child_pd);
    for (_, region) in vma_snapshot(parent_pd) {
        let mut a = region.start;
        while a < region.end() {
            let vaddr = VirtAddr::new(a);
            if let Some(phys) = with_pd_tables(parent_pd, vaddr, |_, pt| {
                pt.map(|pt| PhysAddr::new(unsafe { *pt.wrapping_add(vaddr.page_table_index()) } & ADDR_MASK))
            }) {
                let new_flags = if region.flags & vma::VM_WRITE != 0 {
                    share_frame(phys);
                    region.flags | vma::VM_COW
                } else {
                    region.flags
                };
                map_page(parent_pd, vaddr, phys, new_flags);
                map_page(child_pd, vaddr, phys, new_flags);
            }
            a += FRAME_SIZE as u32;
        }
        if region.flags & vma::VM_WRITE != 0 {
            vma::update_region(parent_pd, region.start, |r| r.flags |= vma::VM_COW);
            vma::update_region(child_pd, region.start, |r| r.flags |= vma::VM_COW);
        }
    }
}

/// Tear down every user mapping in `pd` in preparation for loading a
/// fresh program image (`exec`). The kernel half and the address space
/// itself survive; only the user half is reset.
pub fn exec_reset(pd: PhysAddr) {
    for (_, region) in vma_snapshot(pd) {
        unmap_region_frames(pd, &region);
    }
    vma::reset_user_regions(pd);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_virt_rejects_fixed_below_user_base() {
        let pd = PhysAddr::new(0x9000);
        vma::init_process(pd, vma::USER_MMAP_BASE);
        let result = map_virt(pd, 0x1000, FRAME_SIZE as u32, MAP_FIXED, Backing::None);
        assert_eq!(result, Err(crate::errno::EINVAL));
        vma::destroy_process(pd);
    }

    #[test]
    fn protect_rejects_unmapped_range() {
        let pd = PhysAddr::new(0x9100);
        vma::init_process(pd, vma::USER_MMAP_BASE);
        let result = protect(pd, vma::USER_MMAP_BASE, FRAME_SIZE as u32, vma::VM_READ);
        assert_eq!(result, Err(crate::errno::EINVAL));
        vma::destroy_process(pd);
    }
}
