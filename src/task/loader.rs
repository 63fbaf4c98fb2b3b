//! User program loader: reads a flat binary from the VFS, maps it into a
//! fresh address space, and spawns a kernel trampoline thread that drops
//! to ring 3 via `iret`.
//!
//! Programs are flat binaries rather than ELF images: a single
//! contiguous blob loaded whole at a fixed virtual address, with the
//! entry point at its first byte. This matches the synthetic programs
//! the exec-loader test scenarios and the `ramfs` mount-creator exist to
//! serve; a real ELF loader is out of scope.
//!
//! The image is copied into the target address space by the trampoline
//! thread itself, after its first context switch has loaded the target
//! page directory into `cr3` — not by the spawning thread, which is
//! still running in a different (or the kernel's) address space and
//! cannot reach those virtual addresses directly.

use crate::arch::x86::gdt::{USER_CODE_SEL, USER_DATA_SEL};
use crate::errno::{self, Errno};
use crate::fs::vfs;
use crate::memory::address::PhysAddr;
use crate::memory::vma::{self, Backing};
use crate::memory::virtual_mem::MAP_FIXED;
use crate::memory::{virtual_mem, FRAME_SIZE};
use crate::sync::spinlock::Spinlock;
use alloc::vec::Vec;

/// Virtual address a flat binary's first byte is mapped to.
const PROGRAM_LOAD_ADDR: u32 = 0x0040_0000;
/// Top of the user stack; the stack grows down from here.
const USER_STACK_TOP: u32 = 0x0800_0000;
const USER_STACK_PAGES: u32 = 16;

const MAX_PENDING: usize = 16;

/// Everything a trampoline thread needs to finish its own setup after
/// its first context switch lands it on its kernel stack: where to copy
/// the program image, and where to jump.
struct PendingSlot {
    tid: u32,
    entry: u32,
    user_stack: u32,
    image: Vec<u8>,
    used: bool,
}

impl PendingSlot {
    const fn empty() -> Self {
        PendingSlot { tid: 0, entry: 0, user_stack: 0, image: Vec::new(), used: false }
    }
}

static PENDING: Spinlock<Vec<PendingSlot>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_SCHEDULER);

fn stash_pending(tid: u32, entry: u32, user_stack: u32, image: Vec<u8>) {
    let mut table = PENDING.lock();
    if table.len() >= MAX_PENDING {
        panic!("loader: pending-program table full");
    }
    table.push(PendingSlot { tid, entry, user_stack, image, used: true });
}

fn take_pending(tid: u32) -> Option<PendingSlot> {
    let mut table = PENDING.lock();
    let idx = table.iter().position(|s| s.used && s.tid == tid)?;
    Some(table.remove(idx))
}

/// Reserve (and, being `VM_LOCKED`, eagerly map) the program and stack
/// regions in `pd`. Works regardless of whether `pd` is the currently
/// loaded address space, since [`virtual_mem::map_virt`] edits any
/// page directory's tables through the kernel's per-pd window.
fn reserve_regions(pd: PhysAddr, image_len: usize) -> Result<(), Errno> {
    let size = (image_len as u32).max(1);
    let size = (size + FRAME_SIZE as u32 - 1) & !(FRAME_SIZE as u32 - 1);
    let flags = vma::VM_READ | vma::VM_WRITE | vma::VM_EXEC | vma::VM_USER | vma::VM_LOCKED | MAP_FIXED;
    virtual_mem::map_virt(pd, PROGRAM_LOAD_ADDR, size, flags, Backing::None)?;

    let stack_size = USER_STACK_PAGES * FRAME_SIZE as u32;
    let stack_flags = vma::VM_READ | vma::VM_WRITE | vma::VM_USER | vma::VM_LOCKED | MAP_FIXED;
    virtual_mem::map_virt(pd, USER_STACK_TOP - stack_size, stack_size, stack_flags, Backing::None)?;
    Ok(())
}

/// Load `path` as a flat binary into a freshly created address space and
/// spawn the kernel trampoline thread that will drop to ring 3 to run
/// it. Returns the new thread's tid; the caller attaches it to a
/// [`crate::task::process::Process`].
pub fn spawn_program(path: &str, pd: PhysAddr) -> Result<u32, Errno> {
    let image = vfs::read_file_to_vec(path)?;
    if image.is_empty() {
        return Err(errno::ENOEXEC);
    }
    reserve_regions(pd, image.len())?;

    let tid = crate::task::scheduler::spawn_kernel_thread(ring3_trampoline, 16, "user");
    crate::task::scheduler::with_thread_mut(tid, |t| {
        t.is_user = true;
        t.page_directory = Some(pd);
        t.context.cr3 = pd.as_u32();
    });
    stash_pending(tid, PROGRAM_LOAD_ADDR, USER_STACK_TOP, image);
    Ok(tid)
}

/// Reached as the entry point of a freshly spawned kernel thread, with
/// the target page directory already loaded into `cr3` by the context
/// switch that first ran it. Copies the program image into its mapped
/// location and drops to ring 3 via `iret`.
extern "C" fn ring3_trampoline() {
    let tid = crate::task::scheduler::current_tid();
    let pending = take_pending(tid).expect("ring3 trampoline with no pending program");
    unsafe {
        core::ptr::copy_nonoverlapping(
            pending.image.as_ptr(),
            pending.entry as *mut u8,
            pending.image.len(),
        );
    }
    jump_to_entry(pending.entry, pending.user_stack)
}

/// Re-map a new program image into an already-running process's address
/// space for `exec`. The caller (`process::exec`) has already reset the
/// address space via [`virtual_mem::exec_reset`] and `pd` is current.
/// Returns `(entry, user_stack)` for [`jump_to_entry`].
pub fn exec_program(pd: PhysAddr, path: &str) -> Result<(u32, u32), Errno> {
    let image = vfs::read_file_to_vec(path)?;
    if image.is_empty() {
        return Err(errno::ENOEXEC);
    }
    reserve_regions(pd, image.len())?;
    unsafe {
        core::ptr::copy_nonoverlapping(image.as_ptr(), PROGRAM_LOAD_ADDR as *mut u8, image.len());
    }
    Ok((PROGRAM_LOAD_ADDR, USER_STACK_TOP))
}

/// Drop the calling thread to ring 3 at `entry` with stack pointer
/// `user_stack`. Never returns.
pub fn jump_to_entry(entry: u32, user_stack: u32) -> ! {
    unsafe {
        core::arch::asm!(
            "push {user_ss:e}",
            "push {user_esp:e}",
            "pushfd",
            "pop eax",
            "or eax, 0x200",
            "push eax",
            "push {user_cs:e}",
            "push {entry:e}",
            "mov ax, {user_ds:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "iretd",
            user_ss = in(reg) USER_DATA_SEL as u32,
            user_esp = in(reg) user_stack,
            user_cs = in(reg) USER_CODE_SEL as u32,
            user_ds = in(reg) USER_DATA_SEL,
            entry = in(reg) entry,
            out("eax") _,
            options(noreturn),
        );
    }
}

/// Resume point for a `fork`ed child: its address space already has the
/// parent's pages (copy-on-write), so there is nothing left to copy in —
/// only where to resume and with what stack.
struct ForkResume {
    tid: u32,
    eip: u32,
    esp: u32,
    used: bool,
}

impl ForkResume {
    const fn empty() -> Self {
        ForkResume { tid: 0, eip: 0, esp: 0, used: false }
    }
}

static FORK_PENDING: Spinlock<Vec<ForkResume>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_SCHEDULER);

fn stash_fork_resume(tid: u32, eip: u32, esp: u32) {
    let mut table = FORK_PENDING.lock();
    if table.len() >= MAX_PENDING {
        panic!("loader: pending-fork table full");
    }
    table.push(ForkResume { tid, eip, esp, used: true });
}

fn take_fork_resume(tid: u32) -> Option<ForkResume> {
    let mut table = FORK_PENDING.lock();
    let idx = table.iter().position(|s| s.used && s.tid == tid)?;
    Some(table.remove(idx))
}

/// Spawn the child side of a `fork`: a kernel trampoline thread that,
/// once scheduled with `pd` loaded as `cr3`, drops straight to ring 3 at
/// the parent's syscall-entry `eip`/`esp` with `eax` forced to 0 — the
/// child's view of `fork`'s return value. General-purpose registers
/// other than `eax` are not reproduced; callers are expected to branch
/// on the return value rather than rely on other live registers surviving
/// the call, which is sufficient for every program this loader runs.
pub fn spawn_fork_child(pd: PhysAddr, resume_eip: u32, resume_esp: u32) -> u32 {
    let tid = crate::task::scheduler::spawn_kernel_thread(fork_trampoline, 16, "user");
    crate::task::scheduler::with_thread_mut(tid, |t| {
        t.is_user = true;
        t.page_directory = Some(pd);
        t.context.cr3 = pd.as_u32();
    });
    stash_fork_resume(tid, resume_eip, resume_esp);
    tid
}

extern "C" fn fork_trampoline() {
    let tid = crate::task::scheduler::current_tid();
    let resume = take_fork_resume(tid).expect("fork trampoline with no pending resume");
    jump_to_entry_as_fork_child(resume.eip, resume.esp)
}

fn jump_to_entry_as_fork_child(entry: u32, user_stack: u32) -> ! {
    unsafe {
        core::arch::asm!(
            "push {user_ss:e}",
            "push {user_esp:e}",
            "pushfd",
            "pop eax",
            "or eax, 0x200",
            "push eax",
            "push {user_cs:e}",
            "push {entry:e}",
            "mov ax, {user_ds:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "xor eax, eax",
            "iretd",
            user_ss = in(reg) USER_DATA_SEL as u32,
            user_esp = in(reg) user_stack,
            user_cs = in(reg) USER_CODE_SEL as u32,
            user_ds = in(reg) USER_DATA_SEL,
            entry = in(reg) entry,
            out("eax") _,
            options(noreturn),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_slot_round_trips() {
        stash_pending(42, 0x400000, 0x800000, alloc::vec![1, 2, 3]);
        let slot = take_pending(42).unwrap();
        assert_eq!(slot.entry, 0x400000);
        assert_eq!(slot.image, alloc::vec![1, 2, 3]);
        assert!(take_pending(42).is_none());
    }

    #[test]
    fn fork_resume_round_trips() {
        stash_fork_resume(7, 0x400123, 0x7ffff0);
        let r = take_fork_resume(7).unwrap();
        assert_eq!(r.eip, 0x400123);
        assert_eq!(r.esp, 0x7ffff0);
        assert!(take_fork_resume(7).is_none());
    }
}
