//! Spinlock with preemption disable.
//!
//! The spinlock is the leaf of every lock ordering in the kernel. Acquiring
//! one takes an [`InterruptGuard`], so the holder cannot be preempted on
//! this CPU, and busy-waits on an atomic flag. Critical sections under a
//! spinlock must be short and must never block; the blocking primitives in
//! the kernel core release their spinlock atomically with going to sleep.
//!
//! The guard must be released **explicitly** with
//! [`SpinLockGuard::unlock`]. Letting a guard fall out of scope while the
//! lock is held is a bug, and the drop handler panics with the location the
//! lock was taken at. This makes lock leaks loud instead of silent.

use crate::interrupt::InterruptGuard;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug)]
pub struct WouldBlock;

/// A busy-waiting mutual exclusion primitive protecting a value of type
/// `T`.
///
/// The protected data is only reachable through the guard returned by
/// [`lock`] or [`try_lock`], so it is never touched without holding the
/// lock.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in the unlocked state.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Returns a mutable reference to the protected value.
    ///
    /// The exclusive borrow of the lock is the proof no guard exists, so
    /// no locking is needed. Teardown paths use this.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Acquires the lock, spinning until it is available.
    ///
    /// Interrupts stay disabled for as long as the returned guard lives.
    /// The guard must be released with [`SpinLockGuard::unlock`].
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let intr = loop {
            let intr = InterruptGuard::new();
            if !self.locked.swap(true, Ordering::Acquire) {
                break intr;
            }
            drop(intr);
            core::hint::spin_loop();
        };
        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            intr: Some(intr),
            _not_send: core::marker::PhantomData,
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if the lock is currently held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let intr = InterruptGuard::new();
        if !self.locked.swap(true, Ordering::Acquire) {
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
                intr: Some(intr),
                _not_send: core::marker::PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(T::default())
    }
}

/// A scoped hold of a [`SpinLock`].
///
/// Dropping the guard without calling [`unlock`] panics; release is always
/// explicit.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    intr: Option<InterruptGuard>,
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`] and re-enables interrupts.
    pub fn unlock(mut self) {
        self.lock.locked.store(false, Ordering::Release);
        self.intr.take();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "SpinLockGuard dropped while locked; `.unlock()` is mandatory. Taken at {}",
            self.caller
        );
    }
}
