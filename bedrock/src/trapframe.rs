//! The saved register file crossing the user/kernel boundary.
//!
//! When a user program traps, the machine saves its registers in a
//! [`TrapFrame`]; when the kernel finishes servicing the trap it restores
//! them and returns to user mode. The syscall ABI lives in this frame:
//!
//! - syscall number in `v0`, arguments in `a0..a3`;
//! - on success `v0` holds the return value and `a3` is zero;
//! - on failure `v0` holds the (positive) errno and `a3` is one;
//! - the program counter is advanced past the syscall instruction before
//!   returning, so the trap is not replayed.
//!
//! `fork` copies the caller's entire frame for the child and patches the
//! child's copy so it observes a zero return value.

/// Saved user registers. Only the registers the kernel core reads or
/// writes are modeled; a hardware port carries the full set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TrapFrame {
    /// Function result / syscall number and primary return value.
    pub v0: u32,
    /// Secondary result register.
    pub v1: u32,
    /// First argument.
    pub a0: u32,
    /// Second argument.
    pub a1: u32,
    /// Third argument.
    pub a2: u32,
    /// Fourth argument / syscall error flag on return.
    pub a3: u32,
    /// Global pointer.
    pub gp: u32,
    /// Stack pointer.
    pub sp: u32,
    /// Return address.
    pub ra: u32,
    /// Exception program counter: the address of the trapping instruction.
    pub epc: u32,
}

impl TrapFrame {
    /// Advances the program counter past the trapping instruction.
    #[inline]
    pub fn advance_pc(&mut self) {
        self.epc = self.epc.wrapping_add(4);
    }

    /// Records a successful syscall result.
    #[inline]
    pub fn set_syscall_return(&mut self, retval: u32) {
        self.v0 = retval;
        self.a3 = 0;
    }

    /// Records a failed syscall result.
    #[inline]
    pub fn set_syscall_error(&mut self, errno: u32) {
        self.v0 = errno;
        self.a3 = 1;
    }

    /// Builds the frame for the first entry into a fresh user image:
    /// `main(argc, argv)` with the given stack pointer and entry point.
    pub fn user_entry(entry: u32, sp: u32, argc: u32, argv: u32) -> TrapFrame {
        TrapFrame {
            a0: argc,
            a1: argv,
            a2: 0, // environment pointer; always null on this system
            sp,
            epc: entry,
            ..TrapFrame::default()
        }
    }
}
