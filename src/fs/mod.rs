//! Virtual filesystem: vnode operations table, per-process descriptor
//! table, transfer descriptors for user/kernel copies, and the `devfs`
//! pseudo-filesystem (`con:`, `null`, `rand`).

pub mod devfs;
pub mod fd_table;
pub mod file;
pub mod path;
pub mod transfer;
pub mod vfs;
pub mod vnode;
