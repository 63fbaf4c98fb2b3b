//! Vnodes: the fixed operations capability set every mounted filesystem
//! exposes (component L). An operation a given vnode kind does not
//! support returns a fixed error rather than panicking, matching a
//! hardware driver's "this ioctl isn't wired up" behavior.
//!
//! Modeled as a tagged variant rather than a function-pointer table:
//! there are exactly two backing implementations in this crate (`devfs`
//! and a single-file `ramfs` used by the loader's self-test path), so a
//! `match` reads more plainly than an indirect call through an absent
//! `Option<fn(..)>`.

use crate::errno::{self, Errno};
use crate::fs::transfer::Transfer;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub type VnodeRef = Arc<Vnode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    Regular,
    Directory,
    CharDevice,
    Fifo,
}

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub vnode_type: VnodeType,
    pub size: u64,
}

struct RamfsEntry {
    name: String,
    vnode: VnodeRef,
}

pub enum Vnode {
    /// `con:` — line-buffered serial console.
    Console,
    /// `null` — discards writes, reads return EOF.
    Null,
    /// `rand` — an infinite stream of pseudo-random bytes.
    Rand(crate::sync::mutex::Mutex<u32>),
    /// A directory backed by an in-memory child list (the `ramfs`
    /// mount-creator's root, and any directories created under it).
    RamfsDir(crate::sync::mutex::Mutex<Vec<RamfsEntry>>),
    /// A plain byte buffer file under a `ramfs` mount.
    RamfsFile(crate::sync::mutex::Mutex<Vec<u8>>),
    /// One end of a mailbox-backed pipe or named FIFO.
    Pipe(Arc<crate::sync::mailbox::Mailbox>),
}

impl Vnode {
    pub fn new_ramfs_root() -> VnodeRef {
        Arc::new(Vnode::RamfsDir(crate::sync::mutex::Mutex::new(Vec::new())))
    }

    pub fn new_pipe(capacity: usize) -> VnodeRef {
        Arc::new(Vnode::Pipe(Arc::new(crate::sync::mailbox::Mailbox::new(capacity))))
    }

    pub fn dirent_type(&self) -> VnodeType {
        match self {
            Vnode::Console | Vnode::Null | Vnode::Rand(_) => VnodeType::CharDevice,
            Vnode::RamfsDir(_) => VnodeType::Directory,
            Vnode::RamfsFile(_) => VnodeType::Regular,
            Vnode::Pipe(_) => VnodeType::Fifo,
        }
    }

    pub fn stat(&self) -> Stat {
        let size = match self {
            Vnode::RamfsFile(content) => content.lock().len() as u64,
            _ => 0,
        };
        Stat { vnode_type: self.dirent_type(), size }
    }

    /// Look up `name` as a direct child. Absent on every vnode kind
    /// except a ramfs directory, where it returns `ENOENT` for unknown
    /// names. The spec singles this case out: a vnode that never
    /// supports `follow` yields `ENOTDIR` instead of the generic
    /// unsupported-operation error, since "not a directory" is the
    /// more useful diagnosis for a path walk.
    pub fn follow(&self, name: &str) -> Result<VnodeRef, Errno> {
        match self {
            Vnode::RamfsDir(entries) => entries
                .lock()
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.vnode.clone())
                .ok_or(errno::ENOENT),
            _ => Err(errno::ENOTDIR),
        }
    }

    /// Link an already-constructed child vnode into a ramfs directory.
    /// Used by mount creators (`devfs`) to populate a synthetic root
    /// with device vnodes rather than plain files.
    pub fn link_static(&self, name: &str, child: VnodeRef) {
        if let Vnode::RamfsDir(entries) = self {
            entries.lock().push(RamfsEntry { name: String::from(name), vnode: child });
        }
    }

    pub fn create(self: &VnodeRef, name: &str) -> Result<VnodeRef, Errno> {
        match &**self {
            Vnode::RamfsDir(entries) => {
                let mut entries = entries.lock();
                if entries.iter().any(|e| e.name == name) {
                    return Err(errno::EEXIST);
                }
                let child = Arc::new(Vnode::RamfsFile(crate::sync::mutex::Mutex::new(Vec::new())));
                entries.push(RamfsEntry { name: String::from(name), vnode: child.clone() });
                Ok(child)
            }
            _ => Err(errno::ENOSYS),
        }
    }

    pub fn list_dir(&self) -> Vec<(String, VnodeRef)> {
        match self {
            Vnode::RamfsDir(entries) => {
                entries.lock().iter().map(|e| (e.name.clone(), e.vnode.clone())).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn truncate(&self, len: u64) -> Result<(), Errno> {
        match self {
            Vnode::RamfsFile(content) => {
                content.lock().resize(len as usize, 0);
                Ok(())
            }
            _ => Err(errno::ENOSYS),
        }
    }

    pub fn ioctl(&self, _request: u32, _arg: u32) -> Result<u32, Errno> {
        Err(errno::ENOSYS)
    }

    /// Called when the last open-file reference to this vnode is
    /// dropped. Only the pipe kind has anything to release promptly
    /// (waking the peer so further reads see end-of-stream); the rest
    /// are cleaned up by the vnode's own `Drop` once shared ownership
    /// ends.
    pub fn close(&self) {
        if let Vnode::Pipe(mailbox) = self {
            mailbox.close_write_side();
        }
    }

    pub fn read(&self, transfer: &mut Transfer, len: usize) -> Result<usize, Errno> {
        match self {
            Vnode::Console => crate::drivers::serial::read_console(transfer, len),
            Vnode::Null => Ok(0),
            Vnode::Rand(state) => {
                let mut scratch = [0u8; 64];
                let mut produced = 0usize;
                let mut seed = state.lock();
                while produced < len {
                    let chunk = (len - produced).min(scratch.len());
                    for b in scratch[..chunk].iter_mut() {
                        *seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                        *b = (*seed >> 16) as u8;
                    }
                    let n = crate::fs::transfer::perform_transfer(&mut scratch[..chunk], transfer, chunk)?;
                    produced += n;
                    if n < chunk {
                        break;
                    }
                }
                Ok(produced)
            }
            Vnode::RamfsFile(content) => {
                let content = content.lock();
                let offset = transfer.offset as usize;
                if offset >= content.len() {
                    return Ok(0);
                }
                let avail = content.len() - offset;
                let n = len.min(avail);
                crate::fs::transfer::perform_transfer(&mut content[offset..offset + n].to_vec(), transfer, n)
            }
            Vnode::RamfsDir(_) => Err(errno::EISDIR),
            Vnode::Pipe(mailbox) => {
                let mut scratch = [0u8; 256];
                let mut produced = 0usize;
                while produced < len {
                    let chunk = (len - produced).min(scratch.len());
                    let got = mailbox.read_some(&mut scratch[..chunk], transfer.blockable);
                    if got == 0 {
                        break;
                    }
                    let n = crate::fs::transfer::perform_transfer(&mut scratch[..got], transfer, got)?;
                    produced += n;
                    if n < chunk {
                        break;
                    }
                }
                Ok(produced)
            }
        }
    }

    pub fn write(&self, transfer: &mut Transfer, len: usize) -> Result<usize, Errno> {
        match self {
            Vnode::Console => crate::drivers::serial::write_console(transfer, len),
            Vnode::Null => {
                transfer.advance(len);
                Ok(len)
            }
            Vnode::Rand(_) => Err(errno::ENOSYS),
            Vnode::RamfsFile(content) => {
                let mut buf = alloc::vec![0u8; len];
                let n = crate::fs::transfer::perform_transfer(&mut buf, transfer, len)?;
                let mut content = content.lock();
                let offset = (transfer.offset as usize).saturating_sub(n);
                if content.len() < offset + n {
                    content.resize(offset + n, 0);
                }
                content[offset..offset + n].copy_from_slice(&buf[..n]);
                Ok(n)
            }
            Vnode::RamfsDir(_) => Err(errno::EISDIR),
            Vnode::Pipe(mailbox) => {
                let mut buf = alloc::vec![0u8; len];
                let n = crate::fs::transfer::perform_transfer(&mut buf, transfer, len)?;
                if mailbox.write_some(&buf[..n]) < n {
                    return Err(errno::EPIPE);
                }
                Ok(n)
            }
        }
    }
}
