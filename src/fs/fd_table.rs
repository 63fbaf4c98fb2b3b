//! Per-process descriptor table (component M): a sparse slot array
//! mapping small integers to open-file references, with a per-slot
//! close-on-exec bit independent of the open-file's own flags.

use crate::fs::file::OpenFile;
use alloc::sync::Arc;

/// Size of the sparse FD slot array.
pub const PROC_MAX_FD: usize = 1024;

#[derive(Clone, Copy, Default)]
pub struct FdFlags {
    pub cloexec: bool,
}

#[derive(Clone, Default)]
struct FdEntry {
    file: Option<Arc<OpenFile>>,
    flags: FdFlags,
}

pub struct FdTable {
    entries: alloc::boxed::Box<[FdEntry; PROC_MAX_FD]>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { entries: alloc::boxed::Box::new(core::array::from_fn(|_| FdEntry::default())) }
    }

    /// `CreateFd` — allocate the lowest free slot.
    pub fn create_fd(&mut self, file: Arc<OpenFile>) -> Option<u32> {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.file.is_none() {
                entry.file = Some(file);
                entry.flags = FdFlags::default();
                return Some(i as u32);
            }
        }
        None
    }

    pub fn alloc_above(&mut self, min_fd: u32, file: Arc<OpenFile>) -> Option<u32> {
        let start = min_fd as usize;
        if start >= PROC_MAX_FD {
            return None;
        }
        for i in start..PROC_MAX_FD {
            if self.entries[i].file.is_none() {
                self.entries[i].file = Some(file);
                self.entries[i].flags = FdFlags::default();
                return Some(i as u32);
            }
        }
        None
    }

    pub fn close(&mut self, fd: u32) -> Option<Arc<OpenFile>> {
        let entry = self.entries.get_mut(fd as usize)?;
        let old = entry.file.take();
        entry.flags = FdFlags::default();
        old
    }

    pub fn get(&self, fd: u32) -> Option<Arc<OpenFile>> {
        self.entries.get(fd as usize).and_then(|e| e.file.clone())
    }

    /// `DupFd` — copy `old_fd` onto the lowest free slot. Clears cloexec
    /// on the new slot, as dup always does.
    pub fn dup_fd(&mut self, old_fd: u32) -> Option<u32> {
        let file = self.get(old_fd)?;
        self.create_fd(file)
    }

    /// `DupFd2` — copy `old_fd` onto `new_fd`, closing whatever was
    /// there first. `new_fd == old_fd` is a no-op that still returns
    /// `new_fd`, leaving refcounts untouched.
    pub fn dup_fd2(&mut self, old_fd: u32, new_fd: u32) -> Option<u32> {
        if old_fd == new_fd {
            return self.get(old_fd).map(|_| new_fd);
        }
        let file = self.get(old_fd)?;
        if (new_fd as usize) >= PROC_MAX_FD {
            return None;
        }
        self.entries[new_fd as usize].file = Some(file);
        self.entries[new_fd as usize].flags = FdFlags::default();
        Some(new_fd)
    }

    pub fn set_cloexec(&mut self, fd: u32, cloexec: bool) {
        if let Some(entry) = self.entries.get_mut(fd as usize) {
            entry.flags.cloexec = cloexec;
        }
    }

    pub fn is_cloexec(&self, fd: u32) -> bool {
        self.entries.get(fd as usize).map(|e| e.flags.cloexec).unwrap_or(false)
    }

    /// `HandleExecFd` — close every slot whose cloexec bit is set.
    pub fn handle_exec_fd(&mut self) {
        for entry in self.entries.iter_mut() {
            if entry.flags.cloexec {
                entry.file = None;
                entry.flags = FdFlags::default();
            }
        }
    }

    /// `Fork` — deep-copy the table. Cloning each `Arc<OpenFile>`
    /// increments its strong count, which is the spec's refcount.
    pub fn fork(&self) -> FdTable {
        let mut copy = FdTable::new();
        for (i, entry) in self.entries.iter().enumerate() {
            copy.entries[i] = entry.clone();
        }
        copy
    }

    pub fn close_all(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = FdEntry::default();
        }
    }

    pub fn iter_open(&self) -> impl Iterator<Item = (u32, &Arc<OpenFile>)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| e.file.as_ref().map(|f| (i as u32, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::{OpenFile, OpenFlags};
    use crate::fs::vnode::Vnode;

    fn dummy_file() -> Arc<OpenFile> {
        OpenFile::new(Vnode::new_ramfs_root(), OpenFlags::READ_WRITE, 0)
    }

    #[test]
    fn create_fd_picks_lowest_free_index() {
        let mut table = FdTable::new();
        assert_eq!(table.create_fd(dummy_file()), Some(0));
        assert_eq!(table.create_fd(dummy_file()), Some(1));
        table.close(0);
        assert_eq!(table.create_fd(dummy_file()), Some(0));
    }

    #[test]
    fn dup_fd2_same_fd_is_noop() {
        let mut table = FdTable::new();
        let fd = table.create_fd(dummy_file()).unwrap();
        let before = table.get(fd).map(|f| Arc::strong_count(&f));
        assert_eq!(table.dup_fd2(fd, fd), Some(fd));
        let after = table.get(fd).map(|f| Arc::strong_count(&f));
        assert_eq!(before, after);
    }

    #[test]
    fn dup_fd2_closes_existing_target() {
        let mut table = FdTable::new();
        let a = table.create_fd(dummy_file()).unwrap();
        let b = table.create_fd(dummy_file()).unwrap();
        assert_eq!(table.dup_fd2(a, b), Some(b));
        let a_file = table.get(a).unwrap();
        let b_file = table.get(b).unwrap();
        assert!(Arc::ptr_eq(&a_file, &b_file));
    }

    #[test]
    fn handle_exec_fd_closes_cloexec_slots() {
        let mut table = FdTable::new();
        let a = table.create_fd(dummy_file()).unwrap();
        let b = table.create_fd(dummy_file()).unwrap();
        table.set_cloexec(a, true);
        table.handle_exec_fd();
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }
}
