//! The process table.
//!
//! A sparse array indexed by PID. Slot 0 is the bootstrap kernel process;
//! user PIDs are handed out by linear scan over
//! `[PID_MIN, PID_MAX)`; the index *is* the PID. Insertion places the
//! process; writing the PID into the process object stays the caller's
//! job, which keeps the table ignorant of process internals.

use super::Process;
use crate::{
    Errno,
    limits::{PID_MAX, PID_MIN},
};
use alloc::{sync::Arc, vec::Vec};
use bedrock::spinlock::SpinLock;
use spin::Once;

/// The process table.
pub struct ProcTable {
    slots: SpinLock<Vec<Option<Arc<Process>>>>,
}

impl ProcTable {
    fn new() -> ProcTable {
        let mut slots = Vec::with_capacity(PID_MAX as usize);
        slots.resize_with(PID_MAX as usize, || None);
        ProcTable {
            slots: SpinLock::new(slots),
        }
    }

    /// Places `p` in the first free slot in `[PID_MIN, PID_MAX)` and
    /// returns the slot index as its new PID. The caller records the PID
    /// on the process.
    ///
    /// # Errors
    /// Returns [`Errno::TooManyProcesses`] when every slot is taken.
    pub fn insert(&self, p: &Arc<Process>) -> Result<i32, Errno> {
        let mut slots = self.slots.lock();
        for pid in PID_MIN..PID_MAX {
            if slots[pid as usize].is_none() {
                slots[pid as usize] = Some(p.clone());
                slots.unlock();
                return Ok(pid);
            }
        }
        slots.unlock();
        Err(Errno::TooManyProcesses)
    }

    /// Atomically empties the slot for `pid`, returning whatever was in
    /// it (possibly nothing).
    ///
    /// # Errors
    /// Returns [`Errno::NoSuchProcess`] for out-of-range PIDs.
    pub fn remove(&self, pid: i32) -> Result<Option<Arc<Process>>, Errno> {
        if !(0..PID_MAX).contains(&pid) {
            return Err(Errno::NoSuchProcess);
        }
        let mut slots = self.slots.lock();
        let prev = slots[pid as usize].take();
        slots.unlock();
        Ok(prev)
    }

    /// Looks up the process with `pid`.
    ///
    /// # Errors
    /// Returns [`Errno::NoSuchProcess`] for out-of-range or empty slots.
    pub fn get(&self, pid: i32) -> Result<Arc<Process>, Errno> {
        if !(0..PID_MAX).contains(&pid) {
            return Err(Errno::NoSuchProcess);
        }
        let slots = self.slots.lock();
        let p = slots[pid as usize].clone();
        slots.unlock();
        p.ok_or(Errno::NoSuchProcess)
    }
}

static KPROCTABLE: Once<ProcTable> = Once::new();
static KPROC: Once<Arc<Process>> = Once::new();

/// Creates the system process table with the bootstrap kernel process in
/// slot 0. Later calls are ignored.
pub fn bootstrap() {
    KPROCTABLE.call_once(|| {
        let table = ProcTable::new();
        let kproc = KPROC
            .call_once(|| {
                let p = Process::new_runnable("kernel", Arc::new(super::KernelOnly))
                    .expect("cannot create the bootstrap kernel process");
                p.set_pid(0);
                p
            })
            .clone();
        {
            let mut slots = table.slots.lock();
            slots[0] = Some(kproc);
            slots.unlock();
        }
        log::info!("proc: table ready, pids {}..{}", PID_MIN, PID_MAX);
        table
    });
}

/// The system process table.
///
/// # Panics
/// Panics before [`bootstrap`].
pub fn table() -> &'static ProcTable {
    KPROCTABLE.get().expect("process table not bootstrapped")
}

/// The bootstrap kernel process.
pub fn kproc() -> &'static Arc<Process> {
    KPROC.get().expect("process table not bootstrapped")
}
