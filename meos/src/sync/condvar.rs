//! Condition variables.
//!
//! A condition variable is always used together with a client-supplied
//! [`Mutex`]: the mutex protects the condition, the variable carries the
//! sleepers. Holding the mutex is what makes the check-then-sleep sequence
//! race-free, so every operation here takes the [`MutexGuard`] as its
//! proof that the caller holds the lock.
//!
//! [`wait`](ConditionVariable::wait) atomically releases the mutex and
//! sleeps; on wakeup it re-acquires the mutex before returning, and the
//! caller re-tests its condition; a wakeup is a hint, not a promise.

use super::{
    mutex::{Mutex, MutexGuard},
    wchan::WaitChannel,
};

/// A condition variable.
pub struct ConditionVariable {
    wchan: WaitChannel,
}

impl ConditionVariable {
    /// Creates a condition variable.
    pub const fn new(name: &'static str) -> Self {
        ConditionVariable {
            wchan: WaitChannel::new(name),
        }
    }

    /// Atomically releases the mutex behind `guard` and sleeps; returns a
    /// fresh guard for the same mutex once woken.
    ///
    /// # Panics
    /// Panics in interrupt context.
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        self.wchan.sleep_then(move || guard.unlock());
        mutex.lock()
    }

    /// Acquires `mutex` and waits until `cond` is false, returning the
    /// guard with the condition settled.
    pub fn wait_while<'a, T: ?Sized>(
        &self,
        mutex: &'a Mutex<T>,
        cond: impl Fn(&T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while cond(&guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes one sleeper and releases the mutex behind `guard`.
    pub fn signal<T: ?Sized>(&self, guard: MutexGuard<'_, T>) {
        self.wchan.wake_one();
        guard.unlock();
    }

    /// Wakes every sleeper and releases the mutex behind `guard`.
    pub fn broadcast<T: ?Sized>(&self, guard: MutexGuard<'_, T>) {
        self.wchan.wake_all();
        guard.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::thread::ThreadBuilder;
    use std::sync::Arc;

    const CAP: usize = 2;

    struct BufferState {
        items: [usize; CAP],
        len: usize,
    }

    struct Buffer {
        inner: Mutex<BufferState>,
        not_full: ConditionVariable,
        not_empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            Buffer {
                inner: Mutex::new(
                    "buffer",
                    BufferState {
                        items: [0; CAP],
                        len: 0,
                    },
                ),
                not_full: ConditionVariable::new("not-full"),
                not_empty: ConditionVariable::new("not-empty"),
            }
        }

        fn put(&self, v: usize) {
            let mut g = self.not_full.wait_while(&self.inner, |b| b.len == CAP);
            let len = g.len;
            g.items[len] = v;
            g.len += 1;
            self.not_empty.signal(g);
        }

        fn get(&self) -> usize {
            let mut g = self.not_empty.wait_while(&self.inner, |b| b.len == 0);
            g.len -= 1;
            let v = g.items[g.len];
            self.not_full.signal(g);
            v
        }
    }

    #[test]
    fn bounded_buffer() {
        test_support::boot();
        const ITEMS: usize = 64;
        let buffer = Arc::new(Buffer::new());

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer")
                .spawn(move || {
                    for i in 0..ITEMS {
                        buffer.put(i);
                    }
                })
                .unwrap()
        };

        let consumer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("consumer")
                .spawn(move || {
                    let mut got: std::vec::Vec<usize> =
                        (0..ITEMS).map(|_| buffer.get()).collect();
                    got.sort_unstable();
                    assert_eq!(got, (0..ITEMS).collect::<std::vec::Vec<_>>());
                })
                .unwrap()
        };

        producer.join();
        consumer.join();
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        test_support::boot();
        let ready = Arc::new(Mutex::new("ready", false));
        let cv = Arc::new(ConditionVariable::new("ready-cv"));

        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let (ready, cv) = (ready.clone(), cv.clone());
            handles.push(
                ThreadBuilder::new("waiter")
                    .spawn(move || {
                        let g = cv.wait_while(&ready, |r| !*r);
                        g.unlock();
                    })
                    .unwrap(),
            );
        }

        test_support::settle();
        let mut g = ready.lock();
        *g = true;
        cv.broadcast(g);
        for h in handles {
            h.join();
        }
    }
}
