//! The system-call surface.
//!
//! The trap layer lands every syscall here with the caller's
//! [`TrapFrame`]. The number rides in `v0`, arguments in `a0..a3`;
//! [`dispatch`] decodes, routes, and writes the result back using the
//! machine's return convention (`v0 = retval, a3 = 0` on success,
//! `v0 = errno, a3 = 1` on failure), then advances the program counter
//! past the syscall instruction.
//!
//! `_exit` and a successful `execv` never come back to the dispatcher;
//! `fork` is handed the whole frame because the child needs a copy of it.

pub mod file;
pub mod process;
pub mod uaccess;

use crate::Errno;
use bedrock::trapframe::TrapFrame;

/// The syscall numbers of this kernel's ABI.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyscallNo {
    /// `fork()`
    Fork = 0,
    /// `execv(path, argv)`
    Execv = 1,
    /// `_exit(code)`
    Exit = 2,
    /// `waitpid(pid, status, options)`
    Waitpid = 3,
    /// `getpid()`
    Getpid = 4,
    /// `open(path, flags, mode)`
    Open = 5,
    /// `close(fd)`
    Close = 6,
    /// `read(fd, buf, len)`
    Read = 7,
    /// `write(fd, buf, len)`
    Write = 8,
    /// `lseek(fd, pos, whence)`
    Lseek = 9,
    /// `dup2(oldfd, newfd)`
    Dup2 = 10,
    /// `chdir(path)`
    Chdir = 11,
    /// `__getcwd(buf, len)`
    Getcwd = 12,
}

impl TryFrom<u32> for SyscallNo {
    type Error = Errno;

    fn try_from(v: u32) -> Result<SyscallNo, Errno> {
        Ok(match v {
            0 => SyscallNo::Fork,
            1 => SyscallNo::Execv,
            2 => SyscallNo::Exit,
            3 => SyscallNo::Waitpid,
            4 => SyscallNo::Getpid,
            5 => SyscallNo::Open,
            6 => SyscallNo::Close,
            7 => SyscallNo::Read,
            8 => SyscallNo::Write,
            9 => SyscallNo::Lseek,
            10 => SyscallNo::Dup2,
            11 => SyscallNo::Chdir,
            12 => SyscallNo::Getcwd,
            _ => return Err(Errno::NoSuchSyscall),
        })
    }
}

/// Decodes and services the syscall in `tf`, writing the result back into
/// it. May not return (`_exit`, successful `execv`).
pub fn dispatch(tf: &mut TrapFrame) {
    let (a0, a1, a2) = (tf.a0, tf.a1, tf.a2);
    let result: Result<u32, Errno> = match SyscallNo::try_from(tf.v0) {
        Err(e) => Err(e),
        Ok(no) => match no {
            SyscallNo::Fork => process::sys_fork(tf),
            SyscallNo::Execv => match process::sys_execv(a0 as usize, a1 as usize) {
                Err(e) => Err(e),
            },
            SyscallNo::Exit => process::sys_exit(a0 as i32),
            SyscallNo::Waitpid => process::sys_waitpid(a0 as i32, a1 as usize, a2),
            SyscallNo::Getpid => process::sys_getpid(),
            SyscallNo::Open => file::sys_open(a0 as usize, a1, a2),
            SyscallNo::Close => file::sys_close(a0 as i32),
            SyscallNo::Read => file::sys_read(a0 as i32, a1 as usize, a2 as usize),
            SyscallNo::Write => file::sys_write(a0 as i32, a1 as usize, a2 as usize),
            // The offset rides in one register, sign-extended; the
            // handle offset itself is 64-bit.
            SyscallNo::Lseek => file::sys_lseek(a0 as i32, a1 as i32 as i64, a2),
            SyscallNo::Dup2 => file::sys_dup2(a0 as i32, a1 as i32),
            SyscallNo::Chdir => file::sys_chdir(a0 as usize),
            SyscallNo::Getcwd => file::sys_getcwd(a0 as usize, a1 as usize),
        },
    };
    match result {
        Ok(v) => tf.set_syscall_return(v),
        Err(e) => tf.set_syscall_error(e.errno() as u32),
    }
    tf.advance_pc();
}
