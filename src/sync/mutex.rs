//! Sleeping mutex: a binary semaphore with an RAII guard.
//!
//! Built directly on [`Semaphore`] with a single permit, matching the
//! original design's `CreateMutex` helper (a semaphore whose max count is
//! one). Blocking and wakeup semantics, including the no-recheck direct
//! handoff on unlock, come entirely from `Semaphore::acquire`/`release`.

use crate::sync::semaphore::Semaphore;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub struct Mutex<T> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

/// RAII guard for a held [`Mutex`]. Releases on drop.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            sem: Semaphore::new(1),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the mutex, blocking until it becomes available.
    pub fn lock(&self) -> MutexGuard<T> {
        self.sem.acquire();
        MutexGuard { mutex: self }
    }

    /// Try to acquire without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<T>> {
        if self.sem.try_acquire() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.sem.release();
    }
}
