//! The writer-preferring reader/writer lock.
//!
//! Any number of readers may hold the lock together; a writer holds it
//! alone. The lock prefers writers: `writer_count` counts writers holding
//! *or waiting*, and arriving readers queue whenever it is non-zero, so a
//! stream of readers cannot starve a queued writer.
//!
//! Wakeup policy on release:
//! - the last reader out wakes one writer;
//! - a releasing writer wakes the next waiting writer if there is one,
//!   otherwise wakes *all* waiting readers.
//!
//! A thread contending for the lock moves
//! `idle → queued-reader | queued-writer → holding-read(n ≥ 1) |
//! holding-write → idle`.
//!
//! Guards release on drop, the usual Rust shape for reader/writer locks.

use super::wchan::WaitChannel;
use crate::thread::Current;
use bedrock::spinlock::SpinLock;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

struct RwState {
    reader_count: usize,
    // Writers holding or waiting; readers queue while this is non-zero.
    writer_count: usize,
    active_writer: Option<u64>,
}

/// A blocking reader/writer lock protecting a value of type `T`.
pub struct RwLock<T: ?Sized> {
    state: SpinLock<RwState>,
    readers: WaitChannel,
    writers: WaitChannel,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates an unlocked reader/writer lock.
    pub const fn new(name: &'static str, t: T) -> RwLock<T> {
        RwLock {
            state: SpinLock::new(RwState {
                reader_count: 0,
                writer_count: 0,
                active_writer: None,
            }),
            readers: WaitChannel::new(name),
            writers: WaitChannel::new(name),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires the lock for shared reading. Blocks while any writer
    /// holds or awaits the lock.
    ///
    /// # Panics
    /// Panics in interrupt context.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        assert!(
            !bedrock::interrupt::in_interrupt(),
            "rwlock read acquire in interrupt context"
        );
        let mut st = self.state.lock();
        while st.writer_count > 0 {
            self.readers.sleep(st);
            st = self.state.lock();
        }
        st.reader_count += 1;
        st.unlock();
        RwLockReadGuard { lock: self }
    }

    /// Acquires the lock for exclusive writing. Blocks while any reader or
    /// another writer holds it.
    ///
    /// # Panics
    /// Panics in interrupt context.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        assert!(
            !bedrock::interrupt::in_interrupt(),
            "rwlock write acquire in interrupt context"
        );
        let mut st = self.state.lock();
        // Joining the writer count up front is what turns new readers
        // away while we queue.
        st.writer_count += 1;
        while st.active_writer.is_some() || st.reader_count > 0 {
            self.writers.sleep(st);
            st = self.state.lock();
        }
        st.active_writer = Some(Current::tid());
        st.unlock();
        RwLockWriteGuard { lock: self }
    }
}

/// Shared read access; released on drop.
pub struct RwLockReadGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut st = self.lock.state.lock();
        debug_assert!(st.reader_count > 0);
        st.reader_count -= 1;
        if st.reader_count == 0 {
            self.lock.writers.wake_one();
        }
        st.unlock();
    }
}

/// Exclusive write access; released on drop.
pub struct RwLockWriteGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut st = self.lock.state.lock();
        debug_assert_eq!(st.active_writer, Some(Current::tid()));
        st.active_writer = None;
        st.writer_count -= 1;
        if st.writer_count > 0 {
            self.lock.writers.wake_one();
        } else {
            self.lock.readers.wake_all();
        }
        st.unlock();
    }
}
