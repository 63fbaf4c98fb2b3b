//! Transfer descriptors: the single path every vnode read/write goes
//! through to move bytes between a trusted kernel buffer and either
//! another kernel buffer or a user-space address, validating the
//! latter against the calling process's VMA registry instead of
//! trusting the pointer blindly.

use crate::errno::{self, Errno};
use crate::memory::address::PhysAddr;
use crate::memory::{virtual_mem, vma};
use core::cmp::min;
use core::ptr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realm {
    Kernel,
    User(PhysAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Describes one side of a copy: where the untrusted buffer lives, how
/// many bytes remain, and the file offset it corresponds to. A vnode
/// read/write implementation advances `offset` and shrinks
/// `remaining` as it calls [`perform_transfer`] in a loop.
pub struct Transfer {
    pub realm: Realm,
    pub address: u32,
    pub remaining: u64,
    pub offset: u64,
    pub direction: Direction,
    /// `false` when the open-file has `O_NONBLOCK`; callers on a
    /// blocking primitive (pipes, the console) must not sleep.
    pub blockable: bool,
}

impl Transfer {
    pub fn new_kernel(address: u32, length: u64, offset: u64, direction: Direction) -> Self {
        Transfer { realm: Realm::Kernel, address, remaining: length, offset, direction, blockable: true }
    }

    pub fn new_user(pd: PhysAddr, address: u32, length: u64, offset: u64, direction: Direction, blockable: bool) -> Self {
        Transfer { realm: Realm::User(pd), address, remaining: length, offset, direction, blockable }
    }

    /// Move `offset` and `address` forward by `len` bytes and shrink
    /// `remaining` accordingly, without copying anything. Used by
    /// vnodes (like `null`) that discard or synthesize data instead of
    /// calling [`perform_transfer`].
    pub fn advance(&mut self, len: usize) {
        let len = len as u64;
        self.address = self.address.wrapping_add(len as u32);
        self.offset += len;
        self.remaining = self.remaining.saturating_sub(len);
    }
}

/// Checks that `[addr, addr+len)` lies entirely inside one user-mapped,
/// `VM_USER` region of the address space rooted at `pd`.
fn validate_user_range(pd: PhysAddr, addr: u32, len: u32) -> Result<(), Errno> {
    if len == 0 {
        return Ok(());
    }
    let end = match addr.checked_add(len) {
        Some(e) => e,
        None => return Err(errno::EFAULT),
    };
    match vma::find_region(pd, addr) {
        Some(region) if region.flags & vma::VM_USER != 0 && end <= region.end() => Ok(()),
        _ => Err(errno::EFAULT),
    }
}

/// Copies up to `len` bytes between `trusted_buffer` (always a plain
/// kernel slice) and `untrusted.address`, honoring `untrusted.direction`.
/// Advances `untrusted.address`/`offset` and shrinks `remaining` by the
/// number of bytes actually moved. Returns that count.
pub fn perform_transfer(trusted_buffer: &mut [u8], untrusted: &mut Transfer, len: usize) -> Result<usize, Errno> {
    let n = min(len, min(trusted_buffer.len(), untrusted.remaining as usize));
    if n == 0 {
        return Ok(0);
    }

    match untrusted.realm {
        Realm::Kernel => {
            let dst = untrusted.address as *mut u8;
            match untrusted.direction {
                Direction::Read => unsafe { ptr::copy_nonoverlapping(trusted_buffer.as_ptr(), dst, n) },
                Direction::Write => unsafe { ptr::copy_nonoverlapping(dst as *const u8, trusted_buffer.as_mut_ptr(), n) },
            }
        }
        Realm::User(pd) => {
            validate_user_range(pd, untrusted.address, n as u32)?;
            if pd != virtual_mem::current_pd() {
                return Err(errno::EFAULT);
            }
            let dst = untrusted.address as *mut u8;
            match untrusted.direction {
                Direction::Read => unsafe { ptr::copy_nonoverlapping(trusted_buffer.as_ptr(), dst, n) },
                Direction::Write => unsafe { ptr::copy_nonoverlapping(dst as *const u8, trusted_buffer.as_mut_ptr(), n) },
            }
        }
    }

    untrusted.advance(n);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_transfer_copies_and_advances() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        let mut t = Transfer::new_kernel(dst.as_mut_ptr() as u32, 4, 0, Direction::Read);
        let mut src_buf = src;
        let n = perform_transfer(&mut src_buf, &mut t, 4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(dst, [1, 2, 3, 4]);
        assert_eq!(t.remaining, 0);
        assert_eq!(t.offset, 4);
    }

    #[test]
    fn advance_shrinks_remaining_without_copying() {
        let mut t = Transfer::new_kernel(0, 10, 0, Direction::Write);
        t.advance(3);
        assert_eq!(t.remaining, 7);
        assert_eq!(t.offset, 3);
    }
}
