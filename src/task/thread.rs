//! Thread data structure and lifecycle state.
//!
//! Each thread has a unique TID, a kernel stack, a saved CPU context for
//! context switching, and intrusive list links so it can be queued on the
//! run queue and, independently, on the sleep (timeout) queue at the same
//! time — e.g. a thread blocked on a semaphore with a timeout is linked
//! into the semaphore's wait list via `next[SCHED_QUEUE]` and into the
//! sleep queue via `next[SLEEP_QUEUE]` simultaneously.

use crate::memory::address::PhysAddr;
use crate::task::context::CpuContext;
use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicU32, Ordering};

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Number of independent intrusive-list memberships a thread can hold
/// at once.
pub const N_QUEUES: usize = 2;
/// Run queue / wait-list membership (mutually exclusive: a thread is on
/// at most one of the run queue or a single blocking wait list at a time).
pub const SCHED_QUEUE: usize = 0;
/// Sleep (timeout) queue membership, independent of `SCHED_QUEUE`.
pub const SLEEP_QUEUE: usize = 1;

pub const NUM_PRIORITIES: usize = 32;

/// Execution state of a thread in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to be picked by the scheduler.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Blocked on a semaphore, mailbox, or waitpid, not schedulable.
    Blocked,
    /// Finished execution; awaiting reaping by its parent.
    Terminated,
}

/// A kernel or user thread with its own stack, saved context, and
/// scheduling/IPC linkage.
pub struct Thread {
    pub tid: u32,
    pub pid: u32,
    pub state: ThreadState,
    pub context: CpuContext,
    pub kernel_stack: Box<[u8]>,
    pub priority: u8,
    pub base_priority: u8,
    pub name: [u8; 32],
    pub exit_code: Option<u32>,
    /// TID of a thread waiting on this one via waitpid, if any.
    pub waiter_tid: Option<u32>,
    pub is_user: bool,
    /// Per-process page directory (None for kernel threads, which share
    /// the kernel's own address space).
    pub page_directory: Option<PhysAddr>,
    /// Intrusive links: index by [`SCHED_QUEUE`] / [`SLEEP_QUEUE`].
    /// `u32::MAX` means "not linked".
    pub next: [u32; N_QUEUES],
    /// Absolute `get_system_timer()` nanosecond deadline at which a
    /// sleeping/timed-out thread should be woken. `None` if not queued
    /// on the sleep queue.
    pub sleep_deadline: Option<u64>,
    /// Set by the sleep queue when a timed wait expires before being
    /// satisfied by whatever it was waiting on (mirrors the original
    /// kernel's `timed_out` flag consulted by `AcquireSemaphore`).
    pub timed_out: bool,
    /// True for the per-CPU idle thread: never reaped, never killed,
    /// never placed on the run queue by name (picked only as a fallback).
    pub is_idle: bool,
    pub uid: u16,
    pub gid: u16,
    /// Process group ID, inherited from the owning process at spawn.
    pub pgid: u32,
}

const KERNEL_STACK_SIZE: usize = 16 * 1024;
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

impl Thread {
    /// Create a new kernel thread that begins executing at `entry`.
    /// Starts in the `Ready` state with a freshly allocated kernel stack.
    pub fn new(entry: extern "C" fn(), priority: u8, name: &str) -> Self {
        let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);

        let stack: Box<[u8]> = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
        let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;

        unsafe {
            *(stack.as_ptr() as *mut u64) = STACK_CANARY;
            *((stack_top - 4) as *mut u32) = kernel_thread_exit as *const () as u32;
        }

        let mut context = CpuContext::default();
        context.eip = entry as *const () as u32;
        context.esp = stack_top - 4;
        context.ebp = stack_top;
        context.eflags = 0x202; // IF set
        unsafe { core::arch::asm!("mov {}, cr3", out(reg) context.cr3) };

        let mut name_buf = [0u8; 32];
        let bytes = name.as_bytes();
        let len = bytes.len().min(31);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        Thread {
            tid,
            pid: tid,
            state: ThreadState::Ready,
            context,
            kernel_stack: stack,
            priority,
            base_priority: priority,
            name: name_buf,
            exit_code: None,
            waiter_tid: None,
            is_user: false,
            page_directory: None,
            next: [u32::MAX; N_QUEUES],
            sleep_deadline: None,
            timed_out: false,
            is_idle: false,
            uid: 0,
            gid: 0,
            pgid: tid,
        }
    }

    pub fn kernel_stack_top(&self) -> u32 {
        self.kernel_stack.as_ptr() as u32 + self.kernel_stack.len() as u32
    }

    pub fn kernel_stack_bottom(&self) -> u32 {
        self.kernel_stack.as_ptr() as u32
    }

    pub fn check_stack_canary(&self) -> bool {
        unsafe { *(self.kernel_stack.as_ptr() as *const u64) == STACK_CANARY }
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        core::str::from_utf8(&self.name[..len]).unwrap_or("???")
    }
}

/// Trampoline for kernel threads: reached when a thread's entry function
/// returns via `ret` instead of calling `exit` itself. Placed at
/// `stack_top - 4` during `Thread::new` so it is used as the return
/// address for the entry function.
extern "C" fn kernel_thread_exit() {
    crate::task::scheduler::exit_current(0);
}
