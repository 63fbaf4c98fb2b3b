//! VFS core (component L): mount-creator registry, path resolution
//! through `Vnode::follow`, and the open/read/write/seek entry points
//! syscall handlers drive.
//!
//! Paths are mount-qualified, `name:/rest/of/path`, mirroring the
//! colon-qualified device names the boot console and `devfs` vnodes
//! were already named after. There is no implicit root mount or
//! relative-path fallback: a path without a `:` is rejected.

use crate::errno::{self, Errno};
use crate::fs::file::{OpenFile, OpenFlags, SeekFrom};
use crate::fs::transfer::{Direction, Transfer};
use crate::fs::vnode::{Stat, Vnode, VnodeRef, VnodeType};
use crate::memory::address::PhysAddr;
use crate::sync::spinlock::Spinlock;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

type MountCreator = fn(Option<VnodeRef>) -> Result<VnodeRef, Errno>;

struct Creator {
    #[allow(dead_code)]
    name: &'static str,
    probe: MountCreator,
}

struct Mount {
    name: String,
    root: VnodeRef,
}

static CREATORS: Spinlock<Vec<Creator>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_SCHEDULER);
static MOUNTS: Spinlock<Vec<Mount>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_SCHEDULER);
static INITIALIZED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Register a filesystem driver's mount-creator probe function. Probes
/// run in registration order when [`mount`] is called.
pub fn register_creator(name: &'static str, probe: MountCreator) {
    CREATORS.lock().push(Creator { name, probe });
}

pub fn init() {
    if INITIALIZED.swap(true, core::sync::atomic::Ordering::AcqRel) {
        return;
    }
    register_creator("devfs", crate::fs::devfs::probe);
    register_creator("ramfs", ramfs_probe);
    mount("dev", None).expect("devfs mount creator must always succeed");
    mount("ram", None).expect("ramfs mount creator must always succeed");
    crate::serial_println!("vfs: mounted dev: and ram:");
}

fn ramfs_probe(_device: Option<VnodeRef>) -> Result<VnodeRef, Errno> {
    Ok(Vnode::new_ramfs_root())
}

/// `Mount(path, device)`: poll registered creators in order until one
/// succeeds or all fail with `ENODEV`.
pub fn mount(name: &str, device: Option<VnodeRef>) -> Result<(), Errno> {
    if MOUNTS.lock().iter().any(|m| m.name == name) {
        return Err(errno::EEXIST);
    }
    let creators = CREATORS.lock();
    for creator in creators.iter() {
        if let Ok(root) = (creator.probe)(device.clone()) {
            drop(creators);
            MOUNTS.lock().push(Mount { name: name.to_string(), root });
            return Ok(());
        }
    }
    Err(errno::ENODEV)
}

pub fn umount(name: &str) -> Result<(), Errno> {
    let mut mounts = MOUNTS.lock();
    let before = mounts.len();
    mounts.retain(|m| m.name != name);
    if mounts.len() == before {
        Err(errno::ENOENT)
    } else {
        Ok(())
    }
}

pub fn list_mounts() -> Vec<String> {
    MOUNTS.lock().iter().map(|m| m.name.clone()).collect()
}

fn mount_root(name: &str) -> Result<VnodeRef, Errno> {
    MOUNTS.lock().iter().find(|m| m.name == name).map(|m| m.root.clone()).ok_or(errno::ENOENT)
}

/// Split `name:/a/b/c` into its mount root vnode and the remaining
/// path, walking each component with `follow`. A vnode with no
/// `follow` support yields `ENOTDIR` for any component beneath it.
fn resolve(path: &str) -> Result<VnodeRef, Errno> {
    let (mount_name, rest) = path.split_once(':').ok_or(errno::ENOENT)?;
    let mut current = mount_root(mount_name)?;
    for component in rest.split('/').filter(|c| !c.is_empty()) {
        current = current.follow(component)?;
    }
    Ok(current)
}

/// Resolve all but the last path component, returning the parent vnode
/// and the final component's name (for `create`).
fn resolve_parent(path: &str) -> Result<(VnodeRef, &str), Errno> {
    let (mount_name, rest) = path.split_once(':').ok_or(errno::ENOENT)?;
    let components: Vec<&str> = rest.split('/').filter(|c| !c.is_empty()).collect();
    let last = *components.last().ok_or(errno::ENOENT)?;
    let mut current = mount_root(mount_name)?;
    for component in &components[..components.len() - 1] {
        current = current.follow(component)?;
    }
    Ok((current, last))
}

/// `OpenFile(path, flags, mode, out)`.
pub fn open(path: &str, flags: OpenFlags, mode: u16) -> Result<Arc<OpenFile>, Errno> {
    let vnode = match resolve(path) {
        Ok(v) => v,
        Err(errno::ENOENT) if flags.create => {
            let (parent, name) = resolve_parent(path)?;
            parent.create(name)?
        }
        Err(e) => return Err(e),
    };
    if flags.truncate {
        vnode.truncate(0)?;
    }
    Ok(OpenFile::new(vnode, flags, mode))
}

/// `CloseFile`: dropping the last `Arc<OpenFile>` reference does the
/// work (see `file::OpenFile`'s `Drop` impl); this exists only so
/// callers have an explicit symmetric close to pair with `open`.
pub fn close(_file: Arc<OpenFile>) {}

/// Read into a user-space buffer, validated against `pd`.
pub fn read_user(file: &Arc<OpenFile>, pd: PhysAddr, user_addr: u32, len: usize) -> Result<usize, Errno> {
    if !file.can_read {
        return Err(errno::EBADF);
    }
    let mut position = file.position.lock();
    let mut transfer = Transfer::new_user(pd, user_addr, len as u64, *position, Direction::Read, !file.flags.nonblock);
    let n = file.vnode.read(&mut transfer, len)?;
    *position = transfer.offset;
    Ok(n)
}

pub fn write_user(file: &Arc<OpenFile>, pd: PhysAddr, user_addr: u32, len: usize) -> Result<usize, Errno> {
    if !file.can_write {
        return Err(errno::EBADF);
    }
    let mut position = file.position.lock();
    if file.flags.append {
        *position = file.vnode.stat().size;
    }
    let mut transfer = Transfer::new_user(pd, user_addr, len as u64, *position, Direction::Write, !file.flags.nonblock);
    let n = file.vnode.write(&mut transfer, len)?;
    *position = transfer.offset;
    Ok(n)
}

/// Read the whole file into a freshly-allocated kernel `Vec`, used by
/// the exec loader and other in-kernel consumers with no user address
/// space to validate against.
pub fn read_file_to_vec(path: &str) -> Result<Vec<u8>, Errno> {
    let file = open(path, OpenFlags::READ_ONLY, 0)?;
    let size = file.vnode.stat().size as usize;
    let mut data = alloc::vec![0u8; size];
    let mut transfer = Transfer::new_kernel(data.as_mut_ptr() as u32, size as u64, 0, Direction::Read);
    let n = file.vnode.read(&mut transfer, size)?;
    data.truncate(n);
    Ok(data)
}

static FILE_BACKED_VNODES: Spinlock<Vec<(u32, VnodeRef)>> = Spinlock::new_at(Vec::new(), crate::irql::IRQL_SCHEDULER);

/// Registers a vnode as a demand-paging backing store, returning the
/// id that `Backing::File` carries. Identity is the `Arc`'s own
/// pointer value, so re-registering the same vnode is a no-op.
pub fn register_file_backed_vnode(vnode: VnodeRef) -> u32 {
    let ptr = Arc::as_ptr(&vnode) as u32;
    let mut table = FILE_BACKED_VNODES.lock();
    if !table.iter().any(|(id, _)| *id == ptr) {
        table.push((ptr, vnode));
    }
    ptr
}

fn lookup_vnode_by_id(id: u32) -> Option<VnodeRef> {
    FILE_BACKED_VNODES.lock().iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone())
}

/// Backing for `virtual_mem::resolve_file_backed`: read one page's
/// worth of data directly from a vnode a VM region names by id.
pub fn read_vnode_at(vnode_id: u32, offset: u64, buf: &mut [u8]) -> Option<usize> {
    let vnode = lookup_vnode_by_id(vnode_id)?;
    let mut transfer = Transfer::new_kernel(buf.as_mut_ptr() as u32, buf.len() as u64, offset, Direction::Read);
    vnode.read(&mut transfer, buf.len()).ok()
}

pub fn seek(file: &Arc<OpenFile>, from: SeekFrom) -> Result<u64, Errno> {
    file.seek(from)
}

pub fn fstat(file: &Arc<OpenFile>) -> Stat {
    file.vnode.stat()
}

pub fn stat(path: &str) -> Result<Stat, Errno> {
    Ok(resolve(path)?.stat())
}

pub fn truncate(path: &str, len: u64) -> Result<(), Errno> {
    resolve(path)?.truncate(len)
}

pub fn mkdir(_path: &str) -> Result<(), Errno> {
    Err(errno::ENOSYS)
}

pub fn unlink(_path: &str) -> Result<(), Errno> {
    Err(errno::ENOSYS)
}

pub struct DirListing {
    pub name: String,
    pub vnode_type: VnodeType,
    pub size: u64,
}

pub fn read_dir(path: &str) -> Result<Vec<DirListing>, Errno> {
    let vnode = resolve(path)?;
    if vnode.dirent_type() != VnodeType::Directory {
        return Err(errno::ENOTDIR);
    }
    Ok(vnode
        .list_dir()
        .into_iter()
        .map(|(name, child)| DirListing { name, vnode_type: child.dirent_type(), size: child.stat().size })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devfs_provides_con_null_rand() {
        init();
        assert!(resolve("dev:/con").is_ok());
        assert!(resolve("dev:/null").is_ok());
        assert!(resolve("dev:/rand").is_ok());
        assert_eq!(resolve("dev:/nope").unwrap_err(), errno::ENOENT);
    }

    #[test]
    fn ramfs_create_then_open_round_trips() {
        init();
        let file = open("ram:/greeting", OpenFlags::CREATE_WRITE, 0).unwrap();
        assert_eq!(file.vnode.stat().size, 0);
    }

    #[test]
    fn open_without_mount_prefix_is_rejected() {
        init();
        assert_eq!(open("no-colon", OpenFlags::READ_ONLY, 0).unwrap_err(), errno::ENOENT);
    }
}
