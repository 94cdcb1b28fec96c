//! The blocking mutex.
//!
//! Unlike a spinlock, a contended [`Mutex`] puts the caller to sleep
//! instead of burning the CPU, which makes it the right lock for critical
//! sections that are long or that themselves block (file I/O under a
//! handle lock, the exit-status rendezvous). The holder is tracked by
//! thread id; release by any other thread is a kernel bug and asserts.
//!
//! Acquiring a mutex the calling thread already holds is also a kernel
//! bug: recursion is forbidden and asserts rather than deadlocking or
//! silently succeeding.
//!
//! Like the spinlock, the guard demands an explicit
//! [`MutexGuard::unlock`]; dropping a live guard panics.

use super::wchan::WaitChannel;
use crate::thread::Current;
use bedrock::spinlock::SpinLock;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

struct HolderState {
    holder: Option<u64>,
}

/// A sleeping mutual exclusion primitive protecting a value of type `T`.
pub struct Mutex<T: ?Sized> {
    state: SpinLock<HolderState>,
    wchan: WaitChannel,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex.
    pub const fn new(name: &'static str, t: T) -> Mutex<T> {
        Mutex {
            state: SpinLock::new(HolderState { holder: None }),
            wchan: WaitChannel::new(name),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, sleeping until it is available.
    ///
    /// # Panics
    /// Panics in interrupt context, and if the calling thread already
    /// holds this mutex.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        assert!(
            !bedrock::interrupt::in_interrupt(),
            "mutex acquire in interrupt context"
        );
        let me = Current::tid();
        let mut st = self.state.lock();
        assert_ne!(
            st.holder,
            Some(me),
            "recursive acquire of mutex {:?}",
            self.wchan.name()
        );
        while st.holder.is_some() {
            self.wchan.sleep(st);
            st = self.state.lock();
        }
        st.holder = Some(me);
        st.unlock();
        MutexGuard {
            lock: self,
            _not_send: core::marker::PhantomData,
        }
    }

    /// Does the calling thread hold this mutex?
    pub fn i_hold(&self) -> bool {
        let st = self.state.lock();
        let held = st.holder == Some(Current::tid());
        st.unlock();
        held
    }

    fn raw_unlock(&self) {
        let mut st = self.state.lock();
        assert_eq!(
            st.holder,
            Some(Current::tid()),
            "mutex {:?} released by a thread that does not hold it",
            self.wchan.name()
        );
        st.holder = None;
        self.wchan.wake_one();
        st.unlock();
    }
}

/// A scoped hold of a [`Mutex`]. Must be released with
/// [`unlock`](Self::unlock); dropping a live guard panics.
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// Releases the underlying [`Mutex`], waking one waiter.
    pub fn unlock(self) {
        let lock = self.lock;
        core::mem::forget(self);
        lock.raw_unlock();
    }

    /// The mutex this guard holds. Used by the condition variable to
    /// re-acquire after a wait.
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "MutexGuard for {:?} dropped while locked; `.unlock()` is mandatory",
            self.lock.wchan.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::thread::ThreadBuilder;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[test]
    fn mutual_exclusion_under_contention() {
        test_support::boot();
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;
        let mutex = Arc::new(Mutex::new("counter", 0usize));
        let inside = Arc::new(AtomicUsize::new(0));
        let violated = Arc::new(AtomicBool::new(false));

        let mut handles = std::vec::Vec::new();
        for _ in 0..THREADS {
            let (mutex, inside, violated) =
                (mutex.clone(), inside.clone(), violated.clone());
            handles.push(
                ThreadBuilder::new("contender")
                    .spawn(move || {
                        for _ in 0..ROUNDS {
                            let mut g = mutex.lock();
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                violated.store(true, Ordering::SeqCst);
                            }
                            *g += 1;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            g.unlock();
                        }
                    })
                    .unwrap(),
            );
        }
        for h in handles {
            h.join();
        }
        assert!(!violated.load(Ordering::SeqCst), "two holders at once");
        let g = mutex.lock();
        assert_eq!(*g, THREADS * ROUNDS);
        g.unlock();
    }

    #[test]
    fn contender_sleeps_until_release() {
        test_support::boot();
        let mutex = Arc::new(Mutex::new("gate", ()));
        let acquired = Arc::new(AtomicBool::new(false));
        let g = mutex.lock();

        let blocked = {
            let (mutex, acquired) = (mutex.clone(), acquired.clone());
            ThreadBuilder::new("blockee")
                .spawn(move || {
                    let g = mutex.lock();
                    acquired.store(true, Ordering::SeqCst);
                    g.unlock();
                })
                .unwrap()
        };

        test_support::settle();
        assert!(!acquired.load(Ordering::SeqCst), "lock was not exclusive");
        g.unlock();
        blocked.join();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn i_hold_tracks_ownership() {
        test_support::boot();
        let mutex = Mutex::new("mine", ());
        assert!(!mutex.i_hold());
        let g = mutex.lock();
        assert!(mutex.i_hold());
        g.unlock();
        assert!(!mutex.i_hold());
    }
}
