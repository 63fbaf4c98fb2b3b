//! Per-process state: address space, descriptor table, and the
//! fork/exec/wait lifecycle built on top of the thread scheduler
//! (component N). A process is a bookkeeping record around one or more
//! [`crate::task::thread::Thread`]s; the scheduler remains the sole
//! authority on what actually runs.

use crate::errno::{self, Errno};
use crate::fs::fd_table::FdTable;
use crate::memory::address::PhysAddr;
use crate::memory::virtual_mem;
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::Spinlock;
use crate::task::{loader, scheduler};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// A process's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Has runnable or blocked threads.
    Active,
    /// Exited but not yet observed by a `wait` call.
    Zombie,
    /// Exited and reaped; the table entry is about to be dropped.
    Reaped,
}

pub struct Process {
    pub pid: u32,
    pub parent_pid: u32,
    pub pgid: u32,
    pub address_space: PhysAddr,
    pub threads: Vec<u32>,
    pub fd_table: FdTable,
    pub cwd: String,
    pub signal_mask: u32,
    pub pending_signals: u32,
    pub state: ProcessState,
    pub exit_status: Option<i32>,
    /// Released once per child that exits, so a blocked `wait` wakes up
    /// to re-scan for a matching zombie. `Arc`-boxed so a reference
    /// taken under the table lock stays valid across a `BTreeMap`
    /// rebalance triggered by some other entry's insert/remove while
    /// this thread blocks on it outside the lock.
    child_exit: Arc<Semaphore>,
}

static PROCESSES: Spinlock<BTreeMap<u32, Process>> = Spinlock::new_at(BTreeMap::new(), crate::irql::IRQL_SCHEDULER);

fn next_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Create the very first process (pid 1, no parent) and spawn its
/// initial thread by loading `path` as a flat binary. Called once from
/// the boot sequence.
pub fn spawn_init(path: &str) -> Result<u32, Errno> {
    let pd = virtual_mem::create_address_space();
    crate::memory::vma::init_process(pd, crate::memory::vma::USER_MMAP_BASE);
    let tid = loader::spawn_program(path, pd)?;

    let pid = next_pid();
    scheduler::set_thread_pid(tid, pid);
    scheduler::with_thread_mut(tid, |t| t.pgid = pid);

    PROCESSES.lock().insert(
        pid,
        Process {
            pid,
            parent_pid: 0,
            pgid: pid,
            address_space: pd,
            threads: alloc::vec![tid],
            fd_table: FdTable::new(),
            cwd: String::from("ram:/"),
            signal_mask: 0,
            pending_signals: 0,
            state: ProcessState::Active,
            exit_status: None,
            child_exit: Arc::new(Semaphore::new(0)),
        },
    );
    Ok(pid)
}

pub fn with_process_mut<R>(pid: u32, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    PROCESSES.lock().get_mut(&pid).map(f)
}

pub fn with_process<R>(pid: u32, f: impl FnOnce(&Process) -> R) -> Option<R> {
    PROCESSES.lock().get(&pid).map(f)
}

/// `fork`: clone the calling process's address space (copy-on-write),
/// descriptor table, and current thread. `resume_eip`/`resume_esp` are
/// the calling thread's user-mode instruction and stack pointer at the
/// moment it entered the `fork` syscall (captured by the syscall entry
/// path from its trapframe); the child resumes there with `eax` forced
/// to 0, while the parent's own syscall return path delivers its own
/// `eax` normally (the child's pid).
pub fn fork(parent_pid: u32, resume_eip: u32, resume_esp: u32) -> Result<u32, Errno> {
    let (parent_pd, parent_cwd, parent_pgid) = with_process(parent_pid, |p| {
        (p.address_space, p.cwd.clone(), p.pgid)
    })
    .ok_or(errno::ESRCH)?;

    let child_pd = virtual_mem::create_address_space();
    crate::memory::vma::init_process(child_pd, crate::memory::vma::USER_MMAP_BASE);
    virtual_mem::fork_cow(parent_pd, child_pd);

    let child_tid = loader::spawn_fork_child(child_pd, resume_eip, resume_esp);

    let pid = next_pid();
    scheduler::set_thread_pid(child_tid, pid);
    scheduler::with_thread_mut(child_tid, |t| t.pgid = parent_pgid);

    let child_fds = with_process_mut(parent_pid, |p| p.fd_table.fork()).ok_or(errno::ESRCH)?;

    PROCESSES.lock().insert(
        pid,
        Process {
            pid,
            parent_pid,
            pgid: parent_pgid,
            address_space: child_pd,
            threads: alloc::vec![child_tid],
            fd_table: child_fds,
            cwd: parent_cwd,
            signal_mask: 0,
            pending_signals: 0,
            state: ProcessState::Active,
            exit_status: None,
            child_exit: Arc::new(Semaphore::new(0)),
        },
    );
    Ok(pid)
}

/// `exec`: reset the address space, sweep cloexec descriptors, load the
/// new image, and jump to its entry point. Never returns on success.
pub fn exec(pid: u32, path: &str) -> Result<(u32, u32), Errno> {
    let pd = with_process(pid, |p| p.address_space).ok_or(errno::ESRCH)?;
    with_process_mut(pid, |p| p.fd_table.handle_exec_fd());
    virtual_mem::exec_reset(pd);
    loader::exec_program(pd, path)
}

/// `wait(pid, flags)`: `target == -1` waits for any child, `target > 0`
/// waits for that specific one. Returns `(pid, status)` of a reaped
/// zombie, or `None` if `WNOHANG` and nothing was ready.
pub const WNOHANG: u32 = 1;

pub fn wait(caller_pid: u32, target: i32, flags: u32) -> Result<Option<(u32, i32)>, Errno> {
    loop {
        let found = {
            let mut table = PROCESSES.lock();
            let child_pid = table
                .values()
                .find(|p| {
                    p.parent_pid == caller_pid
                        && p.state == ProcessState::Zombie
                        && (target == -1 || p.pid as i32 == target)
                })
                .map(|p| p.pid);
            child_pid.map(|pid| {
                let status = table.get(&pid).and_then(|p| p.exit_status).unwrap_or(0);
                table.remove(&pid);
                (pid, status)
            })
        };
        if let Some(result) = found {
            return Ok(Some(result));
        }
        if flags & WNOHANG != 0 {
            return Ok(None);
        }
        if !block_on_child_exit(caller_pid) {
            return Err(errno::ESRCH);
        }
    }
}

/// Block the caller on its own process's child-exit semaphore. The
/// table lock cannot be held across a blocking `acquire`, so this clones
/// the `Arc` under the lock and waits on the clone once released —
/// correct even if a `BTreeMap` rebalance from some other entry's
/// insert/remove moves the `Process` record while this thread blocks.
fn block_on_child_exit(pid: u32) -> bool {
    let sem = match PROCESSES.lock().get(&pid) {
        Some(p) => p.child_exit.clone(),
        None => return false,
    };
    sem.acquire();
    true
}

/// Record `pid`'s exit, mark it a zombie, and wake its parent's wait.
pub fn exit(pid: u32, status: i32) {
    let parent = with_process_mut(pid, |p| {
        p.state = ProcessState::Zombie;
        p.exit_status = Some(status);
        p.parent_pid
    });
    if let Some(parent_pid) = parent {
        with_process(parent_pid, |p| p.child_exit.release());
    }
}

/// `getpgid`/`setpgid`-equivalent: a zero target queries the caller's
/// own group; otherwise sets it.
pub fn pgid(pid: u32, new_pgid: Option<u32>) -> Result<u32, Errno> {
    with_process_mut(pid, |p| {
        if let Some(g) = new_pgid {
            p.pgid = g;
        }
        p.pgid
    })
    .ok_or(errno::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pid_is_monotonic_and_unique() {
        let a = next_pid();
        let b = next_pid();
        assert!(b > a);
    }
}
