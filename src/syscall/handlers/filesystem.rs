//! Path-based VFS syscall handlers: stat, readdir, mkdir, truncate,
//! unlink, mount, umount.

use super::helpers::{errno_ret, is_valid_user_ptr, read_user_str_safe, resolve_path};
use crate::errno;
use crate::fs::vfs;

/// `stat(path_ptr, out)`: writes an 8-byte `{vnode_type: u32, size: u32}`
/// record, mirroring [`super::io::sys_fstat`]'s layout.
pub fn sys_stat(path_ptr: u32, stat_ptr: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    if !is_valid_user_ptr(stat_ptr, 8) {
        return errno_ret(errno::EFAULT);
    }
    let resolved = resolve_path(path);
    match vfs::stat(&resolved) {
        Ok(st) => {
            unsafe {
                let buf = stat_ptr as *mut u32;
                *buf = st.vnode_type as u32;
                *buf.add(1) = st.size as u32;
            }
            0
        }
        Err(e) => errno_ret(e),
    }
}

/// Directory entry layout written by `readdir`: `{vnode_type: u32,
/// size: u32, name: [u8; 56]}` = 64 bytes, name null-terminated and
/// truncated at 55 bytes.
const DIRENT_SIZE: u32 = 64;

pub fn sys_readdir(path_ptr: u32, buf_ptr: u32, buf_size: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = resolve_path(path);
    let entries = match vfs::read_dir(&resolved) {
        Ok(e) => e,
        Err(e) => return errno_ret(e),
    };
    if buf_ptr != 0 && buf_size > 0 && is_valid_user_ptr(buf_ptr, buf_size) {
        let max_entries = (buf_size / DIRENT_SIZE) as usize;
        for (i, entry) in entries.iter().enumerate().take(max_entries) {
            let off = buf_ptr + (i as u32) * DIRENT_SIZE;
            let name_bytes = entry.name.as_bytes();
            let name_len = name_bytes.len().min(55);
            unsafe {
                let rec = off as *mut u32;
                *rec = entry.vnode_type as u32;
                *rec.add(1) = entry.size as u32;
                let name_dst = (off + 8) as *mut u8;
                core::ptr::copy_nonoverlapping(name_bytes.as_ptr(), name_dst, name_len);
                *name_dst.add(name_len) = 0;
            }
        }
    }
    entries.len() as u32
}

/// `mkdir` has no backing implementation in the ramfs/devfs vnode set
/// yet ([`crate::fs::vfs::mkdir`] always returns `ENOSYS`); the syscall
/// still passes through rather than short-circuiting here, so a future
/// directory-creation vnode op doesn't require a second change at this
/// layer.
pub fn sys_mkdir(path_ptr: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = resolve_path(path);
    match vfs::mkdir(&resolved) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_unlink(path_ptr: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = resolve_path(path);
    match vfs::unlink(&resolved) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_truncate(path_ptr: u32, len: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = resolve_path(path);
    match vfs::truncate(&resolved, len as u64) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

/// `mount(name_ptr, _unused)`: mounts `name` by polling the registered
/// mount creators with no backing device vnode, matching the `dev:`/
/// `ram:` mounts `vfs::init` itself performs this way.
pub fn sys_mount(name_ptr: u32, _unused: u32) -> u32 {
    let name = match read_user_str_safe(name_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    match vfs::mount(name, None) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_umount(name_ptr: u32) -> u32 {
    let name = match read_user_str_safe(name_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    match vfs::umount(name) {
        Ok(()) => 0,
        Err(e) => errno_ret(e),
    }
}
