//! Crate-wide error codes returned across the syscall boundary.
//!
//! Named after the POSIX errno values they mirror; syscall handlers
//! return `Err(Errno)` and the dispatcher negates the value before it
//! reaches user mode, following the common "negative return = error"
//! convention.

pub type Errno = i32;

pub const EPERM: Errno = 1;
pub const ENOENT: Errno = 2;
pub const ESRCH: Errno = 3;
pub const EINTR: Errno = 4;
pub const EIO: Errno = 5;
pub const ENOEXEC: Errno = 8;
pub const EBADF: Errno = 9;
pub const EAGAIN: Errno = 11;
pub const ENOMEM: Errno = 12;
pub const EFAULT: Errno = 14;
pub const EBUSY: Errno = 16;
pub const EEXIST: Errno = 17;
pub const ENOTDIR: Errno = 20;
pub const EISDIR: Errno = 21;
pub const EINVAL: Errno = 22;
pub const ENFILE: Errno = 23;
pub const EMFILE: Errno = 24;
pub const ESPIPE: Errno = 29;
pub const EPIPE: Errno = 32;
pub const ENAMETOOLONG: Errno = 36;
pub const ENOSYS: Errno = 38;
pub const ENODEV: Errno = 19;
pub const ETIMEDOUT: Errno = 110;

/// Exit code synthesized for a user thread killed by an unhandled page
/// fault (mirrors a SIGSEGV exit status on a POSIX system: 128 + signal).
pub const SIGSEGV_EXIT: u32 = 139;
