//! Shared helper functions used by all syscall handler modules.
//!
//! These are `pub(super)` so they're accessible within the `handlers` module
//! but not exported outside it.

use alloc::string::String;

/// Make a relative path absolute and mount-qualified using the calling
/// process's current working directory, then normalize `.`/`..`
/// components in the part after the mount prefix.
pub(super) fn resolve_path(path: &str) -> String {
    let joined = if path.contains(':') {
        String::from(path)
    } else {
        let pid = crate::task::scheduler::current_pid();
        let cwd = crate::task::process::with_process(pid, |p| p.cwd.clone())
            .unwrap_or_else(|| String::from("ram:/"));
        if cwd.ends_with('/') {
            alloc::format!("{}{}", cwd, path)
        } else {
            alloc::format!("{}/{}", cwd, path)
        }
    };
    match joined.split_once(':') {
        Some((mount, rest)) => alloc::format!("{}:{}", mount, crate::fs::path::normalize(rest)),
        None => joined,
    }
}

/// Convert an `Errno` into a negated-errno return value.
/// Convention: success = 0, error = (-errno) as u32.
/// The libc side checks `(int)ret < 0` and does `errno = -(int)ret`.
pub(super) fn errno_ret(e: crate::errno::Errno) -> u32 {
    (-e) as u32
}

/// Validate that a user pointer is in user address space.
/// Returns false if the pointer is NULL, in kernel space (at or above
/// [`crate::memory::vma::USER_LIMIT`]), or if `ptr + len` overflows.
#[inline]
pub(super) fn is_valid_user_ptr(ptr: u32, len: u32) -> bool {
    if ptr == 0 {
        return false;
    }
    match ptr.checked_add(len) {
        Some(e) => e <= crate::memory::vma::USER_LIMIT,
        None => false,
    }
}

/// Read a null-terminated string from user memory (max 4096 bytes).
/// Fails with `EFAULT` for an invalid pointer, or `ENAMETOOLONG` if the
/// string isn't terminated within the 4096-byte limit.
pub(super) fn read_user_str_safe(ptr: u32) -> Result<&'static str, crate::errno::Errno> {
    if !is_valid_user_ptr(ptr, 1) {
        return Err(crate::errno::EFAULT);
    }
    let p = ptr as *const u8;
    let mut len = 0usize;
    unsafe {
        while len < 4096 {
            if *p.add(len) == 0 {
                return Ok(core::str::from_utf8_unchecked(core::slice::from_raw_parts(p, len)));
            }
            len += 1;
        }
    }
    Err(crate::errno::ENAMETOOLONG)
}

/// Read a null-terminated string from user memory (max 4096 bytes).
/// Returns "" if the pointer is invalid (NULL or kernel space).
pub(super) unsafe fn read_user_str(ptr: u32) -> &'static str {
    if !is_valid_user_ptr(ptr, 1) {
        return "";
    }
    let p = ptr as *const u8;
    let mut len = 0usize;
    while len < 4096 && *p.add(len) != 0 {
        len += 1;
    }
    core::str::from_utf8_unchecked(core::slice::from_raw_parts(p, len))
}
