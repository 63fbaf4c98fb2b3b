//! Open-file handles: `{vnode_ref, seek_position, flags, mode, can_read,
//! can_write}`. The refcount member of the spec's data model is the
//! `Arc`'s own strong count — `dup`/`fork` clone the `Arc`, `close`
//! drops it, and the vnode is dereferenced exactly when the last
//! reference goes away.

use crate::errno::{self, Errno};
use crate::fs::vnode::VnodeRef;
use alloc::sync::Arc;

pub type FileDescriptor = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub nonblock: bool,
}

impl OpenFlags {
    pub const READ_ONLY: OpenFlags =
        OpenFlags { read: true, write: false, append: false, create: false, truncate: false, nonblock: false };

    pub const READ_WRITE: OpenFlags =
        OpenFlags { read: true, write: true, append: false, create: false, truncate: false, nonblock: false };

    pub const CREATE_WRITE: OpenFlags =
        OpenFlags { read: false, write: true, append: false, create: true, truncate: true, nonblock: false };
}

/// `mode` (the creation mode bits) is recorded but never consulted —
/// `flags` alone governs `can_read`/`can_write`.
pub struct OpenFile {
    pub vnode: VnodeRef,
    pub position: crate::sync::mutex::Mutex<u64>,
    pub flags: OpenFlags,
    pub mode: u16,
    pub can_read: bool,
    pub can_write: bool,
}

impl OpenFile {
    pub fn new(vnode: VnodeRef, flags: OpenFlags, mode: u16) -> Arc<OpenFile> {
        Arc::new(OpenFile {
            vnode,
            position: crate::sync::mutex::Mutex::new(0),
            can_read: flags.read,
            can_write: flags.write,
            flags,
            mode,
        })
    }

    pub fn seek(&self, from: SeekFrom) -> Result<u64, Errno> {
        if matches!(self.vnode.dirent_type(), crate::fs::vnode::VnodeType::Fifo) {
            return Err(errno::ESPIPE);
        }
        let mut position = self.position.lock();
        let size = self.vnode.stat().size;
        let new_pos = match from {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => *position as i64 + off,
            SeekFrom::End(off) => size as i64 + off,
        };
        if new_pos < 0 {
            return Err(errno::EINVAL);
        }
        *position = new_pos as u64;
        Ok(*position)
    }
}

/// Dropped implicitly when the last `Arc<OpenFile>` goes away: the
/// vnode's own `close` runs once, from here, regardless of how many
/// descriptor-table slots or dup'd handles pointed at this open-file.
impl Drop for OpenFile {
    fn drop(&mut self) {
        self.vnode.close();
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: alloc::string::String,
    pub vnode_type: crate::fs::vnode::VnodeType,
    pub size: u64,
}
