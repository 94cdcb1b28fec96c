//! Thread abstraction.
//!
//! The kernel core is multi-threaded: every user process is carried by at
//! least one kernel thread, and the blocking primitives in [`crate::sync`]
//! park and wake threads. The *scheduler itself* is outside this crate;
//! what lives here is the contract the core demands of one (the
//! [`Scheduler`](scheduler::Scheduler) trait) and the thread-facing surface
//! built on that contract:
//!
//! - [`ThreadBuilder`] spawns a named kernel thread, optionally bound to a
//!   process.
//! - [`Current`] names the running thread: its id, its process, parking
//!   and exiting.
//! - [`ParkHandle`] is a one-shot capability to wake a parked thread. Wait
//!   channels are a queue of these.
//!
//! Parking follows the same protocol the wait-channel design requires:
//! [`Current::park_with`] hands the caller a handle for itself *before*
//! blocking, the caller publishes the handle and releases its lock, and
//! only then does the thread actually park. An unpark that races ahead of
//! the park is remembered by the wake token, so the wakeup is never lost.

pub mod scheduler;

#[cfg(test)]
pub(crate) mod hosted;

use crate::{Errno, proc::Process};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, string::String, sync::Arc};
use bedrock::spinlock::SpinLock;
use core::sync::atomic::{AtomicBool, Ordering};
use scheduler::scheduler;

/// The wake-side state of a parked thread.
///
/// `wake` may be called before the owning thread has finished parking; the
/// flag makes the wakeup stick.
pub struct WakeToken {
    woken: AtomicBool,
}

impl WakeToken {
    fn new() -> Self {
        WakeToken {
            woken: AtomicBool::new(false),
        }
    }

    /// Marks the owning thread as woken.
    pub fn wake(&self) {
        self.woken.store(true, Ordering::SeqCst);
    }

    /// Has [`wake`](Self::wake) been called?
    pub fn is_woken(&self) -> bool {
        self.woken.load(Ordering::SeqCst)
    }
}

/// A one-shot capability to wake a parked thread.
pub struct ParkHandle {
    tid: u64,
    token: Arc<WakeToken>,
}

impl ParkHandle {
    /// Consumes the handle and wakes the thread it names.
    pub fn unpark(self) {
        scheduler().unpark(self.tid, &self.token);
    }
}

// Bindings from kernel thread to the process it carries. A thread has at
// most one process; a process may be carried by several threads.
static BINDINGS: SpinLock<BTreeMap<u64, Arc<Process>>> = SpinLock::new(BTreeMap::new());

fn bind_current(p: Arc<Process>) {
    let tid = Current::tid();
    p.thread_attached();
    let mut b = BINDINGS.lock();
    b.insert(tid, p);
    b.unlock();
}

fn unbind_current() {
    let mut b = BINDINGS.lock();
    let p = b.remove(&Current::tid());
    b.unlock();
    if let Some(p) = p {
        p.thread_detached();
    }
}

/// The process carried by the calling thread, if any. Pure kernel threads
/// (the bootstrap thread, workers) have none.
pub fn current_process() -> Option<Arc<Process>> {
    let b = BINDINGS.lock();
    let p = b.get(&Current::tid()).cloned();
    b.unlock();
    p
}

/// The running thread on the current CPU.
pub struct Current;

impl Current {
    /// The calling thread's id.
    pub fn tid() -> u64 {
        scheduler().current_tid()
    }

    /// Runs `f` with a [`ParkHandle`] for the calling thread, then parks.
    ///
    /// `f` runs *before* the thread blocks; it is where the caller
    /// publishes the handle (e.g. onto a wait channel) and releases
    /// whatever lock protects that publication. A wake that lands between
    /// publication and the actual park is not lost.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let token = Arc::new(WakeToken::new());
        f(ParkHandle {
            tid: Self::tid(),
            token: token.clone(),
        });
        scheduler().park_current(&token);
    }

    /// Exits the calling thread. If a process is bound, the binding is
    /// dropped first; the process object itself is not touched (process
    /// teardown is the process layer's business).
    pub fn exit(code: i32) -> ! {
        unbind_current();
        scheduler().exit_current(code)
    }
}

/// Yields the CPU to another runnable thread.
pub fn yield_now() {
    scheduler().yield_now();
}

/// A handle to join a spawned thread.
pub struct JoinHandle {
    tid: u64,
}

impl JoinHandle {
    /// The spawned thread's id.
    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// Blocks until the thread exits and returns its exit code.
    pub fn join(self) -> i32 {
        scheduler().join(self.tid)
    }
}

/// Builder for a new kernel thread.
pub struct ThreadBuilder {
    name: String,
    process: Option<Arc<Process>>,
}

impl ThreadBuilder {
    /// Starts building a thread with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        ThreadBuilder {
            name: name.into(),
            process: None,
        }
    }

    /// Binds the new thread to a process. The binding is registered in the
    /// new thread before its body runs.
    pub fn attach_process(mut self, p: Arc<Process>) -> Self {
        self.process = Some(p);
        self
    }

    /// Spawns the thread.
    ///
    /// # Errors
    /// Returns [`Errno::NoMemory`] if the scheduler cannot create the
    /// thread.
    pub fn spawn<F>(self, f: F) -> Result<JoinHandle, Errno>
    where
        F: FnOnce() + Send + 'static,
    {
        let ThreadBuilder { name, process } = self;
        let tid = scheduler().spawn(
            name,
            Box::new(move || {
                if let Some(p) = process {
                    bind_current(p);
                }
                f();
                unbind_current();
            }),
        )?;
        Ok(JoinHandle { tid })
    }
}
