//! `devfs`: the synthetic, no-backing-device mount creator providing
//! `con:`, `null`, and `rand`.

use crate::errno::Errno;
use crate::fs::vnode::{Vnode, VnodeRef};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Probed by `vfs::mount` with no backing device. Always succeeds —
/// this is the synthetic filesystem, not a disk parser that can fail
/// to recognize a superblock.
pub fn probe(_device: Option<VnodeRef>) -> Result<VnodeRef, Errno> {
    let root = Vnode::new_ramfs_root();
    for name in ["con", "null", "rand"] {
        let child = match name {
            "con" => Arc::new(Vnode::Console),
            "null" => Arc::new(Vnode::Null),
            "rand" => Arc::new(Vnode::Rand(crate::sync::mutex::Mutex::new(0x1234_5678))),
            _ => unreachable!(),
        };
        root.link_static(name, child);
    }
    Ok(root)
}

/// Names of the devices this creator populates, for diagnostics.
pub fn device_names() -> Vec<&'static str> {
    alloc::vec!["con", "null", "rand"]
}
