//! Bounded byte-ring mailbox: the kernel's basic producer/consumer
//! channel, underlying pipes and console input queues.
//!
//! Two counting semaphores track how many bytes are free to write
//! (`empty_sem`) and how many are available to read (`full_sem`); two
//! mutexes (`add_mtx`, `get_mtx`) serialize concurrent writers and
//! readers against each other so a single writer (or reader) makes
//! forward progress one byte at a time without tearing another's
//! multi-byte transfer, and an inner mutex protects the ring indices
//! themselves.

use crate::sync::mutex::Mutex;
use crate::sync::semaphore::Semaphore;
use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicBool, Ordering};

struct Ring {
    data: Box<[u8]>,
    start: usize,
    used: usize,
}

pub struct Mailbox {
    ring: Mutex<Ring>,
    full_sem: Semaphore,
    empty_sem: Semaphore,
    add_mtx: Mutex<()>,
    get_mtx: Mutex<()>,
    writer_closed: AtomicBool,
}

impl Mailbox {
    pub fn new(size: usize) -> Self {
        Mailbox {
            ring: Mutex::new(Ring { data: vec![0u8; size].into_boxed_slice(), start: 0, used: 0 }),
            full_sem: Semaphore::new(0),
            empty_sem: Semaphore::new(size as i32),
            add_mtx: Mutex::new(()),
            get_mtx: Mutex::new(()),
            writer_closed: AtomicBool::new(false),
        }
    }

    /// Mark the write side as gone. A reader that drains the remaining
    /// buffered bytes afterwards sees end-of-stream (`read_some` returns
    /// 0) instead of blocking forever.
    pub fn close_write_side(&self) {
        self.writer_closed.store(true, Ordering::Release);
        self.full_sem.release();
    }

    fn writer_gone(&self) -> bool {
        self.writer_closed.load(Ordering::Acquire)
    }

    /// Read up to `buf.len()` bytes. Blocks for the first byte unless
    /// `nonblocking` is set or the write side has closed with the ring
    /// empty (both cases: returns 0 immediately).
    pub fn read_some(&self, buf: &mut [u8], nonblocking: bool) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if nonblocking || self.writer_gone() {
            return self.read_nonblocking(buf);
        }
        match self.get(None) {
            Some(b) => {
                buf[0] = b;
                1 + self.read_nonblocking(&mut buf[1..])
            }
            None => 0,
        }
    }

    /// Write up to `buf.len()` bytes, blocking for room as needed.
    /// Returns the count actually written (short only if the peer is
    /// gone and its buffer stays full).
    pub fn write_some(&self, buf: &[u8]) -> usize {
        let mut n = 0;
        for &b in buf {
            if !self.add(b, None) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Block (up to `timeout_nanos` if `Some`) until at least one byte of
    /// room is free, then append it. Returns `false` on timeout.
    pub fn add(&self, byte: u8, timeout_nanos: Option<u64>) -> bool {
        let _serialize = self.add_mtx.lock();
        let got = match timeout_nanos {
            Some(t) => self.empty_sem.acquire_timeout(t),
            None => {
                self.empty_sem.acquire();
                true
            }
        };
        if !got {
            return false;
        }
        {
            let mut ring = self.ring.lock();
            let pos = (ring.start + ring.used) % ring.data.len();
            ring.data[pos] = byte;
            ring.used += 1;
        }
        self.full_sem.release();
        true
    }

    /// Block (up to `timeout_nanos` if `Some`) until at least one byte is
    /// available, then remove and return it. Returns `None` on timeout.
    pub fn get(&self, timeout_nanos: Option<u64>) -> Option<u8> {
        let _serialize = self.get_mtx.lock();
        let got = match timeout_nanos {
            Some(t) => self.full_sem.acquire_timeout(t),
            None => {
                self.full_sem.acquire();
                true
            }
        };
        if !got {
            return None;
        }
        let byte = {
            let mut ring = self.ring.lock();
            let byte = ring.data[ring.start];
            ring.start = (ring.start + 1) % ring.data.len();
            ring.used -= 1;
            byte
        };
        self.empty_sem.release();
        Some(byte)
    }

    /// Number of bytes immediately available to read without blocking.
    pub fn len(&self) -> usize {
        self.ring.lock().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().data.len()
    }

    /// Write as many bytes of `buf` as fit without blocking. Returns the
    /// count actually written.
    pub fn write_nonblocking(&self, buf: &[u8]) -> usize {
        let _serialize = self.add_mtx.lock();
        let mut n = 0;
        for &b in buf {
            if !self.empty_sem.try_acquire() {
                break;
            }
            {
                let mut ring = self.ring.lock();
                let pos = (ring.start + ring.used) % ring.data.len();
                ring.data[pos] = b;
                ring.used += 1;
            }
            self.full_sem.release();
            n += 1;
        }
        n
    }

    /// Read as many bytes into `buf` as are available without blocking.
    /// Returns the count actually read.
    pub fn read_nonblocking(&self, buf: &mut [u8]) -> usize {
        let _serialize = self.get_mtx.lock();
        let mut n = 0;
        for slot in buf.iter_mut() {
            if !self.full_sem.try_acquire() {
                break;
            }
            let byte = {
                let mut ring = self.ring.lock();
                let byte = ring.data[ring.start];
                ring.start = (ring.start + 1) % ring.data.len();
                ring.used -= 1;
                byte
            };
            self.empty_sem.release();
            *slot = byte;
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonblocking_round_trip() {
        let mbox = Mailbox::new(4);
        assert_eq!(mbox.write_nonblocking(b"ab"), 2);
        assert_eq!(mbox.len(), 2);
        let mut out = [0u8; 4];
        assert_eq!(mbox.read_nonblocking(&mut out), 2);
        assert_eq!(&out[..2], b"ab");
    }

    #[test]
    fn write_nonblocking_stops_at_capacity() {
        let mbox = Mailbox::new(2);
        assert_eq!(mbox.write_nonblocking(b"abc"), 2);
    }
}
