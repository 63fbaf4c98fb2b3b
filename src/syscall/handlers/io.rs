//! File descriptor syscall handlers: open, read, write, close, seek,
//! tell, dup/dup2, ioctl, fstat, isatty.

use super::helpers::{errno_ret, is_valid_user_ptr, read_user_str_safe, resolve_path};
use crate::errno;
use crate::fs::file::{OpenFile, OpenFlags, SeekFrom};
use crate::fs::vfs;
use crate::fs::vnode::VnodeType;
use crate::task::{process, scheduler};
use alloc::sync::Arc;

/// Bit values for `open`'s `flags` argument, matching the userland
/// stdlib's `O_*` constants.
const O_WRONLY: u32 = 1 << 0;
const O_RDWR: u32 = 1 << 1;
const O_CREAT: u32 = 1 << 2;
const O_TRUNC: u32 = 1 << 3;
const O_APPEND: u32 = 1 << 4;
const O_NONBLOCK: u32 = 1 << 5;

fn decode_open_flags(flags: u32) -> OpenFlags {
    OpenFlags {
        read: flags & O_WRONLY == 0,
        write: flags & (O_WRONLY | O_RDWR) != 0,
        append: flags & O_APPEND != 0,
        create: flags & O_CREAT != 0,
        truncate: flags & O_TRUNC != 0,
        nonblock: flags & O_NONBLOCK != 0,
    }
}

/// `open(path_ptr, flags, mode)`: resolves through the caller's cwd,
/// then the vnode it lands on lives in the process's fd table at the
/// lowest free slot.
pub fn sys_open(path_ptr: u32, flags: u32, mode: u32) -> u32 {
    let path = match read_user_str_safe(path_ptr) {
        Ok(p) => p,
        Err(e) => return errno_ret(e),
    };
    let resolved = resolve_path(path);
    let open_flags = decode_open_flags(flags);
    let file = match vfs::open(&resolved, open_flags, mode as u16) {
        Ok(f) => f,
        Err(e) => return errno_ret(e),
    };
    let pid = scheduler::current_pid();
    match process::with_process_mut(pid, |p| p.fd_table.create_fd(file)) {
        Some(Some(fd)) => fd,
        Some(None) => errno_ret(errno::EMFILE),
        None => errno_ret(errno::ESRCH),
    }
}

fn current_file(fd: u32) -> Option<Arc<OpenFile>> {
    let pid = scheduler::current_pid();
    process::with_process(pid, |p| p.fd_table.get(fd)).flatten()
}

pub fn sys_read(fd: u32, buf_ptr: u32, len: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    if !is_valid_user_ptr(buf_ptr, len) {
        return errno_ret(errno::EFAULT);
    }
    let pd = crate::memory::virtual_mem::current_pd();
    match vfs::read_user(&file, pd, buf_ptr, len as usize) {
        Ok(n) => n as u32,
        Err(e) => errno_ret(e),
    }
}

/// Writes that hit a pipe whose read end has gone away raise `SIGPIPE`
/// on the writer before returning `EPIPE`, matching a Unix shell's
/// "broken pipe" behavior for a dead downstream reader.
pub fn sys_write(fd: u32, buf_ptr: u32, len: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    if !is_valid_user_ptr(buf_ptr, len) {
        return errno_ret(errno::EFAULT);
    }
    let pd = crate::memory::virtual_mem::current_pd();
    match vfs::write_user(&file, pd, buf_ptr, len as usize) {
        Ok(n) => n as u32,
        Err(errno::EPIPE) => {
            let pid = scheduler::current_pid();
            super::signal::raise(pid, super::signal::SIGPIPE);
            errno_ret(errno::EPIPE)
        }
        Err(e) => errno_ret(e),
    }
}

pub fn sys_close(fd: u32) -> u32 {
    let pid = scheduler::current_pid();
    match process::with_process_mut(pid, |p| p.fd_table.close(fd)) {
        Some(Some(_file)) => 0,
        Some(None) => errno_ret(errno::EBADF),
        None => errno_ret(errno::ESRCH),
    }
}

fn seek_from(whence: u32, offset: i64) -> Option<SeekFrom> {
    match whence {
        0 => Some(SeekFrom::Start(offset as u64)),
        1 => Some(SeekFrom::Current(offset)),
        2 => Some(SeekFrom::End(offset)),
        _ => None,
    }
}

pub fn sys_seek(fd: u32, offset: u32, whence: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    let from = match seek_from(whence, offset as i32 as i64) {
        Some(f) => f,
        None => return errno_ret(errno::EINVAL),
    };
    match vfs::seek(&file, from) {
        Ok(pos) => pos as u32,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_tell(fd: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    match vfs::seek(&file, SeekFrom::Current(0)) {
        Ok(pos) => pos as u32,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_dup(fd: u32) -> u32 {
    let pid = scheduler::current_pid();
    match process::with_process_mut(pid, |p| p.fd_table.dup_fd(fd)) {
        Some(Some(new_fd)) => new_fd,
        Some(None) => errno_ret(errno::EBADF),
        None => errno_ret(errno::ESRCH),
    }
}

pub fn sys_dup2(old_fd: u32, new_fd: u32) -> u32 {
    let pid = scheduler::current_pid();
    match process::with_process_mut(pid, |p| p.fd_table.dup_fd2(old_fd, new_fd)) {
        Some(Some(fd)) => fd,
        Some(None) => errno_ret(errno::EBADF),
        None => errno_ret(errno::ESRCH),
    }
}

pub fn sys_ioctl(fd: u32, request: u32, arg: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    match file.vnode.ioctl(request, arg) {
        Ok(v) => v,
        Err(e) => errno_ret(e),
    }
}

pub fn sys_isatty(fd: u32) -> u32 {
    match current_file(fd) {
        Some(f) if f.vnode.dirent_type() == VnodeType::CharDevice => 1,
        Some(_) => 0,
        None => errno_ret(errno::EBADF),
    }
}

/// `fstat(fd, out)`: writes an 8-byte `{vnode_type: u32, size: u32}`
/// record, mirroring [`super::filesystem::sys_stat`]'s layout.
pub fn sys_fstat(fd: u32, stat_ptr: u32) -> u32 {
    let file = match current_file(fd) {
        Some(f) => f,
        None => return errno_ret(errno::EBADF),
    };
    if !is_valid_user_ptr(stat_ptr, 8) {
        return errno_ret(errno::EFAULT);
    }
    let stat = vfs::fstat(&file);
    unsafe {
        *(stat_ptr as *mut u32) = stat.vnode_type as u32;
        *((stat_ptr + 4) as *mut u32) = stat.size as u32;
    }
    0
}
