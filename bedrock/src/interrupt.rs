//! The interrupt-enable model.
//!
//! The machine is a uniprocessor; disabling interrupts is how the kernel
//! makes a critical section atomic with respect to preemption. The model is
//! a depth counter: each live [`InterruptGuard`] holds interrupts off, and
//! they come back on when the last guard drops. Spinlocks take a guard for
//! the duration of the hold, which is what gives them their
//! preemption-disabling contract.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static DISABLE_DEPTH: AtomicUsize = AtomicUsize::new(0);
static IN_INTERRUPT: AtomicBool = AtomicBool::new(false);

/// Whether interrupts are currently enabled.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled by at least one live [`InterruptGuard`].
    Off,
}

impl InterruptState {
    /// Reads the current state.
    pub fn current() -> Self {
        if DISABLE_DEPTH.load(Ordering::SeqCst) == 0 {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }
}

/// RAII interrupt disable.
///
/// Creating a guard turns interrupts off; dropping it re-enables them once
/// no other guard is live. Guards nest.
pub struct InterruptGuard {
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl InterruptGuard {
    /// Disables interrupts until the guard is dropped.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        DISABLE_DEPTH.fetch_add(1, Ordering::SeqCst);
        InterruptGuard {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let prev = DISABLE_DEPTH.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unbalanced interrupt enable");
    }
}

/// Is the current context an interrupt handler?
///
/// Code that can block asserts this is false; sleeping in an interrupt
/// handler deadlocks the machine.
pub fn in_interrupt() -> bool {
    IN_INTERRUPT.load(Ordering::SeqCst)
}

/// Marks entry/exit of interrupt context. Called by the trap layer.
#[doc(hidden)]
pub fn set_in_interrupt(on: bool) {
    IN_INTERRUPT.store(on, Ordering::SeqCst);
}
