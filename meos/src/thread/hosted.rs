//! A `std::thread`-backed scheduler for the hosted test harness.
//!
//! Each kernel thread is a host thread; parking maps onto
//! `std::thread::park` guarded by the wake token, and thread exit is an
//! unwind carrying a [`ThreadExit`] payload, caught at the top of every
//! spawned thread. Panics that are *not* a clean exit propagate to
//! whoever joins the thread, so a failed assertion inside a kernel thread
//! fails the test that spawned it.

use super::{WakeToken, scheduler::Scheduler};
use crate::Errno;
use std::{
    boxed::Box,
    cell::Cell,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    string::String,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

/// Unwind payload of a clean thread exit.
pub struct ThreadExit(pub i32);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

// tid -> host thread handle, for unpark. Threads self-register before they
// first park (and at spawn); the main test threads register lazily.
static THREADS: Mutex<BTreeMap<u64, std::thread::Thread>> = Mutex::new(BTreeMap::new());
// tid -> join handle, consumed by join().
static JOINS: Mutex<BTreeMap<u64, std::thread::JoinHandle<i32>>> = Mutex::new(BTreeMap::new());

thread_local! {
    static TID: Cell<u64> = const { Cell::new(0) };
}

fn self_tid() -> u64 {
    TID.with(|t| {
        if t.get() == 0 {
            t.set(NEXT_TID.fetch_add(1, Ordering::SeqCst));
        }
        t.get()
    })
}

/// The hosted scheduler. The test harness installs one static instance.
pub struct HostedScheduler;

impl HostedScheduler {
    pub const fn new() -> Self {
        HostedScheduler
    }
}

impl Scheduler for HostedScheduler {
    fn current_tid(&self) -> u64 {
        self_tid()
    }

    fn spawn(
        &self,
        name: String,
        f: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<u64, Errno> {
        let tid = NEXT_TID.fetch_add(1, Ordering::SeqCst);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                TID.with(|t| t.set(tid));
                THREADS.lock().unwrap().insert(tid, std::thread::current());
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
                THREADS.lock().unwrap().remove(&tid);
                match outcome {
                    Ok(()) => 0,
                    Err(payload) => match payload.downcast::<ThreadExit>() {
                        Ok(exit) => exit.0,
                        Err(payload) => std::panic::resume_unwind(payload),
                    },
                }
            })
            .map_err(|_| Errno::NoMemory)?;
        JOINS.lock().unwrap().insert(tid, handle);
        Ok(tid)
    }

    fn park_current(&self, token: &WakeToken) {
        // Register before the first token check so a concurrent unpark
        // either finds us here or observes its token store first.
        let tid = self_tid();
        THREADS.lock().unwrap().insert(tid, std::thread::current());
        while !token.is_woken() {
            std::thread::park();
        }
    }

    fn unpark(&self, tid: u64, token: &WakeToken) {
        token.wake();
        let target = THREADS.lock().unwrap().get(&tid).cloned();
        if let Some(t) = target {
            t.unpark();
        }
        // A missing entry means the thread has not reached its park yet;
        // it will see the token and never block.
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn join(&self, tid: u64) -> i32 {
        let handle = JOINS
            .lock()
            .unwrap()
            .remove(&tid)
            .expect("join of unknown or already-joined thread");
        match handle.join() {
            Ok(code) => code,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    fn exit_current(&self, code: i32) -> ! {
        std::panic::panic_any(ThreadExit(code))
    }
}
