//! # MEOS: a teaching kernel core for a 32-bit MIPS-like machine.
//!
//! MEOS is the hard center of a small educational operating system: the
//! pieces where concurrency, ownership across process boundaries, binary
//! layout and partial-failure recovery all meet. It builds on the
//! [`bedrock`] machine layer and provides:
//!
//! - [`sync`]: blocking synchronization primitives (wait channels,
//!   semaphores, a blocking mutex, condition variables, and a
//!   writer-preferring reader/writer lock) built on spinlocks.
//! - [`mm`]: physical memory management (the coremap frame allocator),
//!   per-process two-level page tables with lazy frame backing, address
//!   spaces, and TLB refill.
//! - [`proc`]: the process model: PID allocation, parent/child linkage,
//!   and the exit-status rendezvous.
//! - [`fs`]: the opaque file-object contract (vnodes), the console
//!   device, a minimal in-memory filesystem, and per-process file tables
//!   with shared, reference-counted open-file handles.
//! - [`syscall`]: the system-call surface for process management and file
//!   I/O, including safe user-memory access.
//! - [`loader`]: ELF32 image loading and user stack construction for
//!   `execv`.
//!
//! The thread scheduler is deliberately *not* here: [`thread`] defines
//! what the kernel core demands of one (spawn, park/unpark, yield, exit)
//! and any port supplies the implementation. The test harness supplies a
//! hosted one, which is how the whole kernel runs under `cargo test`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod fs;
pub mod loader;
pub mod logging;
pub mod mm;
pub mod proc;
pub mod sync;
pub mod syscall;
pub mod thread;

#[cfg(test)]
pub(crate) mod test_support;

/// System-wide limits, in the spirit of a Unix `limits.h`.
pub mod limits {
    /// Maximum number of open files per process.
    pub const OPEN_MAX: usize = 128;
    /// Maximum length of a path name, including the terminating NUL.
    pub const PATH_MAX: usize = 1024;
    /// Maximum total size of the argument strings passed to `execv`.
    pub const ARG_MAX: usize = 64 * 1024;
    /// Lowest PID handed to a user process. PID 0 is the bootstrap kernel
    /// process; PID 1 is reserved.
    pub const PID_MIN: i32 = 2;
    /// One past the highest valid PID. Kept small so the sparse process
    /// table stays cheap; raise it for a bigger system.
    pub const PID_MAX: i32 = 128;
}

/// Wait-status encoding shared between `_exit` and `waitpid`.
pub mod wait {
    /// `waitpid` option: return immediately instead of blocking.
    /// Accepted and ignored; this kernel always blocks.
    pub const WNOHANG: u32 = 1;
    /// `waitpid` option: also report stopped children. Accepted and
    /// ignored; there is no job control.
    pub const WUNTRACED: u32 = 2;

    /// Encodes a voluntary exit with the given code.
    pub const fn mkwait_exit(code: i32) -> i32 {
        code << 2
    }

    /// Extracts the exit code from an encoded wait status.
    pub const fn wexitstatus(status: i32) -> i32 {
        status >> 2
    }
}

/// An error produced by a kernel operation.
///
/// Each variant corresponds to one errno of the syscall ABI. Kernel code
/// propagates these with `?`; the syscall dispatcher converts the final
/// value with [`Errno::errno`] and reports it to the user program through
/// the trapframe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Errno {
    /// Operation not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// No such process. (ESRCH)
    NoSuchProcess,
    /// I/O error. (EIO)
    IoError,
    /// Argument list too long. (E2BIG)
    TooBig,
    /// Not an executable. (ENOEXEC)
    NotExecutable,
    /// Bad file descriptor. (EBADF)
    BadFileDescriptor,
    /// The caller has no such child. (ECHILD)
    NoChild,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Bad user-space address. (EFAULT)
    BadAddress,
    /// File already exists. (EEXIST)
    FileExists,
    /// Not a directory. (ENOTDIR)
    NotDirectory,
    /// Is a directory. (EISDIR)
    IsDirectory,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// Too many open files in the system. (ENFILE)
    TooManyFilesInSystem,
    /// Too many open files in this process. (EMFILE)
    TooManyOpenFiles,
    /// Illegal seek on an unseekable object. (ESPIPE)
    IllegalSeek,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Unknown system call. (ENOSYS)
    NoSuchSyscall,
    /// The process table is full. (EMPROC)
    TooManyProcesses,
}

impl Errno {
    /// The positive errno code of this error, as reported to user space.
    pub const fn errno(self) -> i32 {
        match self {
            Errno::OperationNotPermitted => 1,
            Errno::NoSuchEntry => 2,
            Errno::NoSuchProcess => 3,
            Errno::IoError => 5,
            Errno::TooBig => 7,
            Errno::NotExecutable => 8,
            Errno::BadFileDescriptor => 9,
            Errno::NoChild => 10,
            Errno::NoMemory => 12,
            Errno::BadAddress => 14,
            Errno::FileExists => 17,
            Errno::NotDirectory => 20,
            Errno::IsDirectory => 21,
            Errno::InvalidArgument => 22,
            Errno::TooManyFilesInSystem => 23,
            Errno::TooManyOpenFiles => 24,
            Errno::IllegalSeek => 29,
            Errno::NameTooLong => 36,
            Errno::NoSuchSyscall => 38,
            // Not a POSIX code; this kernel's own "process table full".
            Errno::TooManyProcesses => 90,
        }
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?} (errno {})", self.errno())
    }
}
