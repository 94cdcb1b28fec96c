//! Counting semaphores.
//!
//! A semaphore holds a non-negative count. [`p`](Semaphore::p) waits for
//! the count to become positive and decrements it; [`v`](Semaphore::v)
//! increments it and wakes one waiter. The classic uses are resource
//! counting and event signaling; a semaphore created with a count of zero
//! is a one-shot or repeating "it happened" signal.
//!
//! There is no FIFO guarantee: a thread woken by `v` re-tests the count
//! and can lose the race to a fresh arrival.

use super::wchan::WaitChannel;
use bedrock::spinlock::SpinLock;

/// A counting semaphore.
pub struct Semaphore {
    count: SpinLock<usize>,
    wchan: WaitChannel,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub const fn new(name: &'static str, initial: usize) -> Self {
        Semaphore {
            count: SpinLock::new(initial),
            wchan: WaitChannel::new(name),
        }
    }

    /// Waits until the count is positive, then decrements it.
    ///
    /// # Panics
    /// Panics in interrupt context; `p` may block.
    pub fn p(&self) {
        assert!(
            !bedrock::interrupt::in_interrupt(),
            "semaphore P in interrupt context"
        );
        let mut count = self.count.lock();
        while *count == 0 {
            // The channel releases our spinlock atomically with parking;
            // re-acquire and re-test after every wakeup.
            self.wchan.sleep(count);
            count = self.count.lock();
        }
        *count -= 1;
        count.unlock();
    }

    /// Increments the count and wakes one waiter, if any.
    pub fn v(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.wchan.wake_one();
        count.unlock();
    }

    /// The current count. Advisory; it may be stale by the time the caller
    /// looks at it.
    pub fn count(&self) -> usize {
        let count = self.count.lock();
        let v = *count;
        count.unlock();
        v
    }
}
