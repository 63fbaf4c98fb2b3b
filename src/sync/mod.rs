//! Synchronization primitives for the kernel.
//!
//! Provides an IRQL-bound [`spinlock::Spinlock`], a sleeping [`mutex::Mutex`],
//! a counting [`semaphore::Semaphore`], and a [`mailbox::Mailbox`] byte
//! channel built on top of both.

pub mod mailbox;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;
