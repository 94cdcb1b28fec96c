//! The scheduler contract.
//!
//! Scheduling policy, context switching and idle loops are a port concern;
//! the kernel core only needs the handful of operations below. A port
//! installs its scheduler once at boot with [`set_scheduler`]; the hosted
//! test harness installs a `std::thread`-backed one.

use super::WakeToken;
use crate::Errno;
use alloc::{boxed::Box, string::String};
use spin::Once;

/// What the kernel core demands of a thread scheduler.
pub trait Scheduler: Sync {
    /// The id of the calling thread.
    fn current_tid(&self) -> u64;

    /// Creates and starts a kernel thread running `f`, returning its id.
    fn spawn(
        &self,
        name: String,
        f: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<u64, Errno>;

    /// Blocks the calling thread until `token` is woken. Must tolerate the
    /// wake having already happened.
    fn park_current(&self, token: &WakeToken);

    /// Wakes the thread `tid`, whose park used `token`.
    fn unpark(&self, tid: u64, token: &WakeToken);

    /// Gives up the CPU to another runnable thread.
    fn yield_now(&self);

    /// Blocks until thread `tid` exits; returns its exit code.
    fn join(&self, tid: u64) -> i32;

    /// Terminates the calling thread.
    fn exit_current(&self, code: i32) -> !;
}

static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Installs the system scheduler. First caller wins; later calls are
/// ignored.
pub fn set_scheduler(s: &'static dyn Scheduler) {
    SCHEDULER.call_once(|| s);
}

/// The installed scheduler.
///
/// # Panics
/// Panics if no scheduler has been installed; nothing in the kernel core
/// can block or spawn before boot wires one up.
pub fn scheduler() -> &'static dyn Scheduler {
    *SCHEDULER.get().expect("no scheduler installed")
}
