//! Process and thread syscall handlers: lifecycle (exit, kill, fork,
//! exec, waitpid), scheduling (yield, nanosleep, alarm), anonymous
//! memory mapping (mmap, munmap), and identity (getpid, gettid, pgid).

use super::helpers::{errno_ret, is_valid_user_ptr, read_user_str_safe};
use crate::errno;
use crate::memory::vma::{self, Backing};
use crate::memory::virtual_mem;
use crate::task::{process, scheduler};

pub fn sys_yield() -> u32 {
    scheduler::yield_now();
    0
}

pub fn sys_getpid() -> u32 {
    scheduler::current_pid()
}

pub fn sys_gettid() -> u32 {
    scheduler::current_tid()
}

/// `kill(pid, sig)`: raise a signal on another process. `sig == 0` is the
/// POSIX existence probe — no signal is actually delivered.
pub fn sys_kill(pid: u32, sig: u32) -> u32 {
    if process::with_process(pid, |_| ()).is_none() {
        return errno_ret(errno::ESRCH);
    }
    if sig != 0 {
        super::signal::raise(pid, sig);
    }
    0
}

pub fn sys_exit(status: u32) -> u32 {
    let pid = scheduler::current_pid();
    process::exit(pid, status as i32);
    scheduler::exit_current(status)
}

/// `nanosleep(nanos, _unused)`: block the calling thread until the
/// requested duration has elapsed.
pub fn sys_nanosleep(nanos_lo: u32, nanos_hi: u32) -> u32 {
    let nanos = (nanos_lo as u64) | ((nanos_hi as u64) << 32);
    let deadline = crate::irql::get_system_timer() + nanos;
    scheduler::sleep_current_until(deadline);
    0
}

/// `alarm(seconds)`: install a Unix-style alarm, returning the number of
/// seconds left on any previous one (truncated from the microsecond
/// value `install_unix_alarm` tracks internally).
pub fn sys_alarm(seconds: u32) -> u32 {
    let pid = scheduler::current_pid();
    let remaining_micros = crate::task::alarm::install_unix_alarm(seconds, deliver_sigalrm, pid as usize);
    remaining_micros / 1_000_000
}

fn deliver_sigalrm(pid: usize) {
    super::signal::raise(pid as u32, super::signal::SIGALRM);
}

/// `mmap(size, flags, _unused)`: allocate an anonymous region in the
/// caller's address space. `flags` is the raw `VM_*` bitmask; `VM_USER`
/// is forced on regardless of what the caller passes, since this syscall
/// only ever maps into user space.
pub fn sys_mmap(size: u32, flags: u32, _unused: u32) -> u32 {
    let pid = scheduler::current_pid();
    let pd = match process::with_process(pid, |p| p.address_space) {
        Some(pd) => pd,
        None => return errno_ret(errno::ESRCH),
    };
    match virtual_mem::map_virt(pd, 0, size, flags | vma::VM_USER, Backing::None) {
        Ok(addr) => addr,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_munmap(addr: u32, size: u32) -> u32 {
    let pid = scheduler::current_pid();
    let pd = match process::with_process(pid, |p| p.address_space) {
        Some(pd) => pd,
        None => return errno_ret(errno::ESRCH),
    };
    virtual_mem::unmap_virt(pd, addr, size);
    0
}

/// `mprotect(addr, size, flags)`: change the protection of an
/// already-mapped region. `flags` is the raw `VM_READ`/`VM_WRITE`/`VM_EXEC`
/// bitmask; `VM_USER` is forced on like [`sys_mmap`] does.
pub fn sys_mprotect(addr: u32, size: u32, flags: u32) -> u32 {
    let pid = scheduler::current_pid();
    let pd = match process::with_process(pid, |p| p.address_space) {
        Some(pd) => pd,
        None => return errno_ret(errno::ESRCH),
    };
    match virtual_mem::protect(pd, addr, size, flags | vma::VM_USER) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

/// `fork()`: `eip`/`esp` are the caller's user-mode instruction and stack
/// pointer at the moment it entered this syscall, taken straight from the
/// trapframe rather than the thread's (stale) saved context.
pub fn sys_fork(regs: &mut crate::syscall::SyscallRegs) -> u32 {
    let pid = scheduler::current_pid();
    match process::fork(pid, regs.eip, regs.esp) {
        Ok(child_pid) => child_pid,
        Err(e) => errno_ret(e),
    }
}

/// `exec(path_ptr)`: never returns to the caller on success — the syscall
/// return path is replaced by a ring-3 jump into the new image.
pub fn sys_exec(path_ptr: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let path = super::helpers::resolve_path(path);
    let pid = scheduler::current_pid();
    match process::exec(pid, &path) {
        Ok((entry, user_stack)) => crate::task::loader::jump_to_entry(entry, user_stack),
        Err(e) => errno_ret(e),
    }
}

pub fn sys_waitpid(target: u32, status_ptr: u32, flags: u32) -> u32 {
    wait_impl(target as i32, status_ptr, flags, true)
}

pub fn sys_try_waitpid(target: u32, status_ptr: u32) -> u32 {
    wait_impl(target as i32, status_ptr, process::WNOHANG, false)
}

fn wait_impl(target: i32, status_ptr: u32, flags: u32, _blocking: bool) -> u32 {
    let caller = scheduler::current_pid();
    match process::wait(caller, target, flags) {
        Ok(Some((pid, status))) => {
            if status_ptr != 0 && is_valid_user_ptr(status_ptr, 4) {
                unsafe { *(status_ptr as *mut i32) = status };
            }
            pid
        }
        Ok(None) => 0,
        Err(e) => errno_ret(e),
    }
}

/// `pgid(new_pgid)`: `0` queries the caller's own group, non-zero sets it.
pub fn sys_pgid(new_pgid: u32) -> u32 {
    let pid = scheduler::current_pid();
    let target = if new_pgid == 0 { None } else { Some(new_pgid) };
    match process::pgid(pid, target) {
        Ok(g) => g,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_chdir(path_ptr: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = super::helpers::resolve_path(path);
    match crate::fs::vfs::stat(&resolved) {
        Ok(stat) if stat.vnode_type == crate::fs::vnode::VnodeType::Directory => {
            let pid = scheduler::current_pid();
            process::with_process_mut(pid, |p| p.cwd = resolved);
            0
        }
        Ok(_) => errno_ret(errno::ENOTDIR),
        Err(e) => errno_ret(e),
    }
}
