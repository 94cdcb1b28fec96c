//! File system calls: `open`, `close`, `read`, `write`, `lseek`, `dup2`,
//! `chdir`, `__getcwd`.
//!
//! All of them operate on the calling process's file table. Data moves
//! through bounded kernel buffers one chunk at a time, so a user request
//! for an enormous transfer never pins an enormous kernel allocation.
//!
//! `dup2` deserves its one subtlety: evicting an occupied destination
//! slot and installing the source handle happen in a single file-table
//! lock section, and the evicted handle is dropped only after the lock is
//! released.

use crate::{
    Errno,
    fs::{self, FileHandle, OpenFlags, file_table::Whence},
    limits::PATH_MAX,
    proc::Process,
    syscall::uaccess::{UserCString, UserU8SliceRO, UserU8SliceWO},
    thread,
};
use alloc::{sync::Arc, vec};

// One transfer's worth of kernel bounce buffer.
const IO_CHUNK: usize = 16 * 1024;

fn current_process() -> Arc<Process> {
    thread::current_process().expect("file syscall from a bare kernel thread")
}

/// `open(path, flags, mode) -> fd`.
///
/// `mode` (creation permissions) is accepted for ABI shape and ignored;
/// there is no permission model yet.
pub fn sys_open(path_addr: usize, flags: u32, _mode: u32) -> Result<u32, Errno> {
    let path = UserCString::new(path_addr).read(PATH_MAX)?;
    let flags = OpenFlags::decode(flags)?;
    let vnode = fs::open(&path, flags)?;
    let handle = FileHandle::create(&path, vnode, flags);
    let fd = current_process().file_table().add(handle)?;
    Ok(fd as u32)
}

/// `close(fd)`.
pub fn sys_close(fd: i32) -> Result<u32, Errno> {
    current_process().file_table().remove(fd)?;
    Ok(0)
}

/// `read(fd, buf, len) -> n`.
///
/// Reads at the handle's offset and advances it by the bytes read.
pub fn sys_read(fd: i32, buf_addr: usize, len: usize) -> Result<u32, Errno> {
    let handle = current_process().file_table().get(fd)?;
    let mut kbuf = vec![0u8; len.min(IO_CHUNK)];
    let mut total = 0;
    while total < len {
        let want = (len - total).min(kbuf.len());
        let n = handle.read(&mut kbuf[..want])?;
        if n == 0 {
            break;
        }
        UserU8SliceWO::new(buf_addr + total, n).write(&kbuf[..n])?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total as u32)
}

/// `write(fd, buf, len) -> n`.
///
/// Writes at the handle's offset and advances it by the bytes written.
pub fn sys_write(fd: i32, buf_addr: usize, len: usize) -> Result<u32, Errno> {
    let handle = current_process().file_table().get(fd)?;
    let mut total = 0;
    while total < len {
        let want = (len - total).min(IO_CHUNK);
        let chunk = UserU8SliceRO::new(buf_addr + total, want).read()?;
        let n = handle.write(&chunk)?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total as u32)
}

/// `lseek(fd, pos, whence) -> new offset`.
pub fn sys_lseek(fd: i32, pos: i64, whence: u32) -> Result<u32, Errno> {
    let handle = current_process().file_table().get(fd)?;
    let whence = Whence::try_from(whence)?;
    let new_offset = handle.lseek(pos, whence)?;
    Ok(new_offset as u32)
}

/// `dup2(oldfd, newfd) -> newfd`.
///
/// Makes `newfd` another reference to `oldfd`'s open-file description.
/// An occupied destination is closed first.
pub fn sys_dup2(oldfd: i32, newfd: i32) -> Result<u32, Errno> {
    if oldfd == newfd {
        // Still must be a valid descriptor to report success.
        current_process().file_table().get(oldfd)?;
        return Ok(newfd as u32);
    }
    let table = current_process();
    let table = table.file_table();
    let handle = table.get(oldfd)?;
    let evicted = table.install_at(newfd, handle)?;
    drop(evicted);
    Ok(newfd as u32)
}

/// `chdir(path)`.
pub fn sys_chdir(path_addr: usize) -> Result<u32, Errno> {
    let path = UserCString::new(path_addr).read(PATH_MAX)?;
    let canonical = fs::chdir(&path)?;
    current_process().set_cwd(&canonical);
    Ok(0)
}

/// `__getcwd(buf, len) -> bytes written`.
///
/// Copies the current directory name (no terminator) into the user
/// buffer, truncating to `len` like the VFS contract it stands in for.
pub fn sys_getcwd(buf_addr: usize, len: usize) -> Result<u32, Errno> {
    let cwd = current_process().cwd();
    let bytes = cwd.as_bytes();
    let n = UserU8SliceWO::new(buf_addr, len).write(bytes)?;
    Ok(n as u32)
}
