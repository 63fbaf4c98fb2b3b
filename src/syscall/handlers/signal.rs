//! Signal delivery: per-process pending/blocked bitmasks, handler
//! registration, and the trampoline that redirects a returning syscall's
//! `iret` frame into a user handler.
//!
//! Threads map one-to-one onto processes in this kernel (no `pthread`
//! surface is exposed to userland), so the pending/blocked masks the
//! design sketches per-thread are carried on [`crate::task::process::Process`]
//! instead — an equivalent simplification given that mapping.

use super::helpers::errno_ret;
use crate::errno;
use crate::task::{process, scheduler};

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGSTOP: u32 = 19;
pub const SIGCONT: u32 = 18;

pub const SIG_DFL: u32 = 0;
pub const SIG_IGN: u32 = 1;

fn default_is_terminate(sig: u32) -> bool {
    !matches!(sig, SIGCHLD | SIGCONT)
}

/// Set `sig` pending on `pid` and, if the process has it blocked, leave it
/// queued for the next syscall-return check. `SIGKILL`/`SIGSTOP` can never
/// be blocked or ignored at delivery time — that is enforced here, not by
/// rejecting the registration, matching the read side rather than the
/// write side of POSIX's rule.
pub fn raise(pid: u32, sig: u32) {
    process::with_process_mut(pid, |p| {
        p.pending_signals |= 1 << sig;
    });
}

static HANDLERS: crate::sync::spinlock::Spinlock<[u32; 32]> =
    crate::sync::spinlock::Spinlock::new_at([SIG_DFL; 32], crate::irql::IRQL_SCHEDULER);

fn handler_for(sig: u32) -> u32 {
    HANDLERS.lock()[sig as usize]
}

/// `signal(sig, handler)`: install a handler, returning the previous one.
/// `handler` is `SIG_DFL` (0), `SIG_IGN` (1), or a user code address.
pub fn sys_signal(sig: u32, handler: u32) -> u32 {
    if sig == 0 || sig >= 32 || sig == SIGKILL || sig == SIGSTOP {
        return errno_ret(errno::EINVAL);
    }
    let mut table = HANDLERS.lock();
    let old = table[sig as usize];
    table[sig as usize] = handler;
    old
}

/// `sigprocmask(how, set)`: `how` is 0=block, 1=unblock, 2=setmask.
/// Returns the previous blocked mask. `SIGKILL`/`SIGSTOP` are never
/// actually blockable; the bit may be set here but [`deliver_pending`]
/// ignores it for those two signals.
pub fn sys_sigprocmask(how: u32, set: u32) -> u32 {
    let pid = scheduler::current_pid();
    process::with_process_mut(pid, |p| {
        let old = p.signal_mask;
        p.signal_mask = match how {
            0 => old | set,
            1 => old & !set,
            2 => set,
            _ => old,
        };
        old
    })
    .unwrap_or(0)
}

/// Signal frame written onto the user stack by [`deliver_pending`] so a
/// user handler can run and `sigreturn` unwinds back to the interrupted
/// context. 28 bytes: return address, signum, an 8-byte trampoline that
/// re-enters the kernel with `SYS_SIGRETURN`, then the saved eax/eip/eflags.
const FRAME_SIZE: u32 = 28;

/// `sigreturn`: called by the trampoline the signal frame plants on the
/// user stack. Restores the interrupted `eip`/`eflags`/`esp` into the
/// `iret` frame and hands back the syscall result the signal preempted.
pub fn sys_sigreturn(regs: &mut crate::syscall::SyscallRegs) -> u32 {
    let user_esp = regs.esp;
    let saved_eax = unsafe { *((user_esp + 12) as *const u32) };
    let saved_eip = unsafe { *((user_esp + 16) as *const u32) };
    let saved_eflags = unsafe { *((user_esp + 20) as *const u32) };

    regs.eip = saved_eip;
    regs.eflags = saved_eflags;
    regs.esp = user_esp + 24;
    saved_eax
}

/// Run after every syscall returns: if the calling process has a pending,
/// unblocked signal, divert the `iret` frame either to terminate the
/// process (default action) or to a user handler via a planted frame.
pub(super) fn deliver_pending(regs: &mut crate::syscall::SyscallRegs, syscall_result: u32) {
    let pid = scheduler::current_pid();
    if pid == 0 {
        return;
    }
    let sig = match process::with_process_mut(pid, |p| {
        let deliverable = p.pending_signals & !p.signal_mask;
        if deliverable == 0 {
            return None;
        }
        let sig = deliverable.trailing_zeros();
        p.pending_signals &= !(1 << sig);
        Some(sig)
    }) {
        Some(Some(sig)) => sig,
        _ => return,
    };

    let handler = handler_for(sig);
    if handler == SIG_DFL {
        if default_is_terminate(sig) {
            let exit_code = 128 + sig;
            process::exit(pid, exit_code as i32);
            scheduler::exit_current(exit_code);
        }
        return;
    }
    if handler == SIG_IGN {
        return;
    }

    let old_esp = regs.esp;
    let new_esp = old_esp - FRAME_SIZE;
    unsafe {
        let frame = new_esp as *mut u32;
        *frame.offset(0) = new_esp + 8; // return address -> trampoline
        *frame.offset(1) = sig;
        let trampoline = (new_esp + 8) as *mut u8;
        *trampoline.offset(0) = 0xB8; // mov eax, imm32
        let sigreturn_bytes = crate::syscall::SYS_SIGRETURN.to_le_bytes();
        trampoline.offset(1).copy_from_nonoverlapping(sigreturn_bytes.as_ptr(), 4);
        *trampoline.offset(5) = 0xCD; // int
        *trampoline.offset(6) = 0x80;
        *trampoline.offset(7) = 0x90; // nop pad
        *frame.offset(4) = syscall_result;
        *frame.offset(5) = regs.eip;
        *frame.offset(6) = regs.eflags;
    }
    regs.eip = handler;
    regs.esp = new_esp;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_handler_round_trips() {
        assert_eq!(sys_signal(SIGTERM, 0x1000), SIG_DFL);
        assert_eq!(handler_for(SIGTERM), 0x1000);
        assert_eq!(sys_signal(SIGTERM, SIG_IGN), 0x1000);
    }

    #[test]
    fn sigkill_rejected_for_handler_install() {
        assert_eq!(sys_signal(SIGKILL, 0x2000), errno_ret(errno::EINVAL));
    }
}
