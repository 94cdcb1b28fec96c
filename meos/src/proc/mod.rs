//! The process model.
//!
//! A process bundles the states the rest of the kernel manages on its
//! behalf: an address space, a file table, a current directory, the set of
//! kernel threads carrying it, and the exit-status rendezvous its parent
//! reaps it through. Parent/child linkage is by PID, never by pointer:
//! a parent may exit and be removed while its children live on, and a
//! stale pointer would dangle where a stale PID merely misses.
//!
//! A process may exist *after* it has exited: if its parent is alive the
//! record stays in the [`table`](crate::proc::table) holding the exit
//! status until `waitpid` collects it. Orphans destroy themselves on
//! exit.
//!
//! The exit protocol orders its writes so a waiter that observes
//! `exited == true` is guaranteed to read the final status: the status is
//! written under the process spinlock, the flag is set before that lock is
//! released, and the wakeup broadcast happens under the exit-wait mutex.

pub mod table;

pub use table::{bootstrap, kproc, table};

use crate::{
    Errno,
    fs::file_table::FileTable,
    mm::AddrSpace,
    sync::{ConditionVariable, Mutex},
};
use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
};
use bedrock::{spinlock::SpinLock, trapframe::TrapFrame};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

/// The machine-level user-mode entry for a process.
///
/// Entering user mode is the trap layer's business, not the kernel
/// core's: a hardware port installs a trampoline that restores the frame
/// and jumps; the hosted test harness installs simulated user programs
/// that issue syscalls directly. `fork` hands the parent's entry to the
/// child, so both run the same image.
pub trait UserProgram: Send + Sync {
    /// Enters user mode with the given register state. Does not return.
    fn enter(&self, tf: &TrapFrame) -> !;
}

/// The entry for processes that never reach user mode (the bootstrap
/// kernel process). Entering is a kernel bug.
pub struct KernelOnly;

impl UserProgram for KernelOnly {
    fn enter(&self, _tf: &TrapFrame) -> ! {
        panic!("kernel-only process tried to enter user mode");
    }
}

/// A process.
pub struct Process {
    name: String,
    pid: AtomicI32,
    ppid: AtomicI32,
    addrspace: SpinLock<Option<Box<AddrSpace>>>,
    file_table: FileTable,
    cwd: SpinLock<String>,
    program: Arc<dyn UserProgram>,
    n_threads: AtomicUsize,
    exited: AtomicBool,
    exit_status: SpinLock<i32>,
    wait_lock: Mutex<()>,
    wait_cv: ConditionVariable,
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .finish()
    }
}

impl Process {
    /// Creates a process shell ready to run a user program: empty address
    /// space slot, a file table with the console on descriptors 0/1/2,
    /// and the current directory inherited from the caller (or `/`).
    ///
    /// The PID is unset until the caller inserts the process into the
    /// process table.
    ///
    /// # Errors
    /// Returns [`Errno::NoMemory`]-class errors if the console cannot be
    /// opened for the standard descriptors.
    pub fn new_runnable(
        name: &str,
        program: Arc<dyn UserProgram>,
    ) -> Result<Arc<Process>, Errno> {
        let cwd = crate::thread::current_process()
            .map(|p| p.cwd())
            .unwrap_or_else(|| "/".to_string());
        Ok(Arc::new(Process {
            name: name.to_string(),
            pid: AtomicI32::new(-1),
            ppid: AtomicI32::new(0),
            addrspace: SpinLock::new(None),
            file_table: FileTable::new_with_console()?,
            cwd: SpinLock::new(cwd),
            program,
            n_threads: AtomicUsize::new(0),
            exited: AtomicBool::new(false),
            exit_status: SpinLock::new(0),
            wait_lock: Mutex::new("exit-wait", ()),
            wait_cv: ConditionVariable::new("exit-cv"),
        }))
    }

    /// The process name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process id. `-1` until the process is in the table.
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::SeqCst)
    }

    /// Assigns the process id; done by whoever inserts the process into
    /// the table.
    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    /// The parent's pid at creation time. The parent may since have
    /// exited and been removed.
    pub fn ppid(&self) -> i32 {
        self.ppid.load(Ordering::SeqCst)
    }

    /// Records the parent's pid.
    pub fn set_ppid(&self, ppid: i32) {
        self.ppid.store(ppid, Ordering::SeqCst);
    }

    /// The per-process file table.
    pub fn file_table(&self) -> &FileTable {
        &self.file_table
    }

    /// The user-mode entry shared by this process's threads.
    pub fn program(&self) -> Arc<dyn UserProgram> {
        self.program.clone()
    }

    /// The current working directory.
    pub fn cwd(&self) -> String {
        let g = self.cwd.lock();
        let s = g.clone();
        g.unlock();
        s
    }

    /// Replaces the current working directory.
    pub fn set_cwd(&self, path: &str) {
        let mut g = self.cwd.lock();
        *g = path.to_string();
        g.unlock();
    }

    /// Installs an address space, returning the previous one.
    pub fn set_addrspace(&self, aspace: AddrSpace) -> Option<Box<AddrSpace>> {
        let mut g = self.addrspace.lock();
        let old = g.replace(Box::new(aspace));
        g.unlock();
        old
    }

    /// Detaches the address space, leaving none installed. `execv` parks
    /// the old space here while the new image loads.
    pub fn take_addrspace(&self) -> Option<Box<AddrSpace>> {
        let mut g = self.addrspace.lock();
        let old = g.take();
        g.unlock();
        old
    }

    /// Re-installs a previously detached address space.
    pub fn restore_addrspace(&self, aspace: Option<Box<AddrSpace>>) {
        let mut g = self.addrspace.lock();
        *g = aspace;
        g.unlock();
    }

    /// Runs `f` with the process's address space (or `None`).
    pub fn with_addrspace<R>(&self, f: impl FnOnce(Option<&mut AddrSpace>) -> R) -> R {
        let mut g = self.addrspace.lock();
        let r = f(g.as_deref_mut());
        g.unlock();
        r
    }

    pub(crate) fn thread_attached(&self) {
        self.n_threads.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn thread_detached(&self) {
        let prev = self.n_threads.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "thread detach underflow");
    }

    /// Number of kernel threads currently carrying this process.
    pub fn n_threads(&self) -> usize {
        self.n_threads.load(Ordering::SeqCst)
    }

    /// Has the process exited? Monotonic false → true.
    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// The encoded exit status. Meaningful only once [`exited`] is true,
    /// after which it never changes.
    ///
    /// [`exited`]: Self::exited
    pub fn exit_status(&self) -> i32 {
        let g = self.exit_status.lock();
        let st = *g;
        g.unlock();
        st
    }

    /// Publishes the exit status and wakes every waiter.
    ///
    /// The status is written and the exited flag set before the process
    /// spinlock is released, so any waiter that sees the flag sees the
    /// final status; the broadcast is taken under the exit-wait mutex so
    /// a waiter between its test and its sleep cannot miss it.
    pub fn mark_exited(&self, status: i32) {
        let mut g = self.exit_status.lock();
        *g = status;
        self.exited.store(true, Ordering::Release);
        g.unlock();
        let wg = self.wait_lock.lock();
        self.wait_cv.broadcast(wg);
    }

    /// Blocks until this process exits. The caller owns the reaping
    /// decision; this only waits.
    pub fn wait_for_exit(&self) {
        let mut g = self.wait_lock.lock();
        while !self.exited() {
            g = self.wait_cv.wait(g);
        }
        g.unlock();
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(name: &str) -> Arc<Process> {
        Process::new_runnable(name, Arc::new(KernelOnly)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::thread::ThreadBuilder;
    use crate::wait;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn exit_rendezvous_publishes_status_before_wakeup() {
        test_support::boot();
        let p = Process::new_for_test("rendezvous");
        let observed = Arc::new(AtomicI32::new(0));

        let waiter = {
            let (p, observed) = (p.clone(), observed.clone());
            ThreadBuilder::new("waiter")
                .spawn(move || {
                    p.wait_for_exit();
                    observed.store(p.exit_status(), Ordering::SeqCst);
                })
                .unwrap()
        };

        test_support::settle();
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        p.mark_exited(wait::mkwait_exit(7));
        waiter.join();
        assert_eq!(
            wait::wexitstatus(observed.load(Ordering::SeqCst)),
            7,
            "waiter must observe the final status"
        );
    }

    #[test]
    fn wait_after_exit_returns_immediately() {
        test_support::boot();
        let p = Process::new_for_test("already-gone");
        p.mark_exited(wait::mkwait_exit(3));
        let done = AtomicBool::new(false);
        p.wait_for_exit();
        done.store(true, Ordering::SeqCst);
        assert!(done.load(Ordering::SeqCst));
        assert!(p.exited());
    }

    #[test]
    fn thread_bookkeeping() {
        test_support::boot();
        let p = Process::new_for_test("counted");
        assert_eq!(p.n_threads(), 0);
        let h = {
            let p2 = p.clone();
            ThreadBuilder::new("carrier")
                .attach_process(p.clone())
                .spawn(move || {
                    assert_eq!(p2.n_threads(), 1);
                })
                .unwrap()
        };
        h.join();
        assert_eq!(p.n_threads(), 0);
    }
}
