//! Syscall number-to-name mapping table.
//!
//! Used only for the `debug_verbose` trace line in [`super::syscall_dispatch`];
//! never consulted for dispatch itself.

use super::*;

pub const SYSCALL_TABLE: &[(u32, &str)] = &[
    (SYS_YIELD, "yield"),
    (SYS_KILL, "kill"),
    (SYS_MMAP, "mmap"),
    (SYS_MUNMAP, "munmap"),
    (SYS_MPROTECT, "mprotect"),
    (SYS_OPEN, "open"),
    (SYS_READ, "read"),
    (SYS_WRITE, "write"),
    (SYS_CLOSE, "close"),
    (SYS_SEEK, "seek"),
    (SYS_DUP, "dup"),
    (SYS_DUP2, "dup2"),
    (SYS_EXIT, "exit"),
    (SYS_UNLINK, "unlink"),
    (SYS_WAITPID, "waitpid"),
    (SYS_TRY_WAITPID, "try_waitpid"),
    (SYS_FORK, "fork"),
    (SYS_EXEC, "exec"),
    (SYS_GETPID, "getpid"),
    (SYS_GETTID, "gettid"),
    (SYS_IOCTL, "ioctl"),
    (SYS_STAT, "stat"),
    (SYS_FSTAT, "fstat"),
    (SYS_ISATTY, "isatty"),
    (SYS_CHDIR, "chdir"),
    (SYS_READDIR, "readdir"),
    (SYS_MKDIR, "mkdir"),
    (SYS_TRUNCATE, "truncate"),
    (SYS_MOUNT, "mount"),
    (SYS_UMOUNT, "umount"),
    (SYS_INFO, "info"),
    (SYS_TIME, "time"),
    (SYS_NANOSLEEP, "nanosleep"),
    (SYS_ALARM, "alarm"),
    (SYS_SIGNAL, "signal"),
    (SYS_SIGPROCMASK, "sigprocmask"),
    (SYS_SIGRETURN, "sigreturn"),
    (SYS_TELL, "tell"),
    (SYS_PGID, "pgid"),
];

/// Look up a syscall number's name, falling back to `"?"` for anything
/// not in the table (the `_ => ENOSYS` arm of `syscall_dispatch`).
pub fn syscall_name(num: u32) -> &'static str {
    SYSCALL_TABLE.iter().find(|(n, _)| *n == num).map(|(_, name)| *name).unwrap_or("?")
}
