//! Wait channels.
//!
//! A wait channel is the place where a blocking primitive's sleepers live.
//! The channel owns a queue of [`ParkHandle`]s behind its own spinlock;
//! the primitive using the channel keeps its state behind *its* spinlock
//! and hands that lock's guard to [`WaitChannel::sleep`], which publishes
//! the handle, releases the guard, and parks, in that order, so a wakeup
//! arriving between release and park is never lost.
//!
//! No fairness is promised. A woken sleeper re-enters the primitive's
//! acquire path and may lose to a fresh arrival.

use crate::thread::{Current, ParkHandle};
use alloc::collections::vec_deque::VecDeque;
use bedrock::spinlock::{SpinLock, SpinLockGuard};

/// A queue of sleeping threads.
pub struct WaitChannel {
    name: &'static str,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl WaitChannel {
    /// Creates an empty wait channel. The name shows up in diagnostics
    /// only.
    pub const fn new(name: &'static str) -> Self {
        WaitChannel {
            name,
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// The channel's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Atomically releases `guard` and puts the calling thread to sleep on
    /// this channel.
    ///
    /// The caller re-acquires its lock and re-tests its condition after
    /// waking; a wakeup is a hint, not a grant.
    ///
    /// # Panics
    /// Panics in interrupt context: an interrupt handler must never block.
    pub fn sleep<T>(&self, guard: SpinLockGuard<'_, T>) {
        self.sleep_then(move || guard.unlock());
    }

    /// As [`sleep`](Self::sleep), but the lock being released is not a
    /// spinlock guard; `release` runs after the calling thread is
    /// published on the channel and before it parks.
    pub(crate) fn sleep_then(&self, release: impl FnOnce()) {
        assert!(
            !bedrock::interrupt::in_interrupt(),
            "sleep on wait channel {:?} in interrupt context",
            self.name
        );
        Current::park_with(|handle| {
            let mut q = self.waiters.lock();
            q.push_back(handle);
            q.unlock();
            release();
        });
    }

    /// Wakes one sleeping thread, if any.
    pub fn wake_one(&self) {
        let mut q = self.waiters.lock();
        let handle = q.pop_front();
        q.unlock();
        if let Some(h) = handle {
            h.unpark();
        }
    }

    /// Wakes every sleeping thread.
    pub fn wake_all(&self) {
        let mut q = self.waiters.lock();
        let drained: VecDeque<ParkHandle> = core::mem::take(&mut *q);
        q.unlock();
        for h in drained {
            h.unpark();
        }
    }
}
