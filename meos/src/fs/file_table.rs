//! File handles and per-process file tables.
//!
//! A [`FileHandle`] is a shared open-file description: the vnode, the
//! open flags, and the byte offset, with a blocking mutex serializing
//! read/write/seek on the handle. Descriptor slots, in any number of
//! file tables, are non-owning references modeled as `Arc` clones;
//! `Arc`'s strong count *is* the handle refcount, and the last slot to
//! let go destroys the handle (releasing the vnode with it).
//!
//! A [`FileTable`] is a fixed array of [`OPEN_MAX`] slots behind a
//! spinlock. Descriptors 0/1/2 are pre-opened on the console, read-only,
//! write-only, write-only. The table lock is a leaf: nothing blocks while
//! holding it, and handle mutexes are never taken under it.

use super::{OpenFlags, Vnode};
use crate::{Errno, limits::OPEN_MAX, sync::Mutex};
use alloc::{
    string::{String, ToString},
    sync::Arc,
};
use array_init::array_init;
use bedrock::spinlock::SpinLock;

/// Where an `lseek` measures from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Whence {
    /// From the start of the file.
    Set,
    /// From the current offset.
    Current,
    /// From the end of the file.
    End,
}

impl TryFrom<u32> for Whence {
    type Error = Errno;

    fn try_from(v: u32) -> Result<Whence, Errno> {
        match v {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(Errno::InvalidArgument),
        }
    }
}

struct FileState {
    offset: i64,
}

/// A shared open-file description.
pub struct FileHandle {
    name: String,
    vnode: Arc<dyn Vnode>,
    flags: OpenFlags,
    state: Mutex<FileState>,
}

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileHandle").field("name", &self.name).finish()
    }
}

impl FileHandle {
    /// Creates a handle at offset zero with one reference (the returned
    /// `Arc`).
    pub fn create(name: &str, vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Arc<FileHandle> {
        Arc::new(FileHandle {
            name: name.to_string(),
            vnode,
            flags,
            state: Mutex::new("file-handle", FileState { offset: 0 }),
        })
    }

    /// The name the handle was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The open flags.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// The current offset. Advisory snapshot.
    pub fn offset(&self) -> i64 {
        let st = self.state.lock();
        let off = st.offset;
        st.unlock();
        off
    }

    /// Reads at the current offset and advances it by the bytes read.
    ///
    /// # Errors
    /// [`Errno::BadFileDescriptor`] if the handle is write-only; vnode
    /// errors pass through.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut st = self.state.lock();
        if !self.flags.readable() {
            st.unlock();
            return Err(Errno::BadFileDescriptor);
        }
        match self.vnode.read_at(buf, st.offset as u64) {
            Ok(n) => {
                st.offset += n as i64;
                st.unlock();
                Ok(n)
            }
            Err(e) => {
                st.unlock();
                Err(e)
            }
        }
    }

    /// Writes at the current offset and advances it by the bytes written.
    ///
    /// # Errors
    /// [`Errno::BadFileDescriptor`] if the handle is read-only; vnode
    /// errors pass through.
    pub fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        let mut st = self.state.lock();
        if !self.flags.writable() {
            st.unlock();
            return Err(Errno::BadFileDescriptor);
        }
        match self.vnode.write_at(buf, st.offset as u64) {
            Ok(n) => {
                st.offset += n as i64;
                st.unlock();
                Ok(n)
            }
            Err(e) => {
                st.unlock();
                Err(e)
            }
        }
    }

    /// Repositions the offset.
    ///
    /// # Errors
    /// - [`Errno::IllegalSeek`]: the vnode is not seekable.
    /// - [`Errno::InvalidArgument`]: the resulting offset would be
    ///   negative.
    pub fn lseek(&self, pos: i64, whence: Whence) -> Result<i64, Errno> {
        let mut st = self.state.lock();
        if !self.vnode.is_seekable() {
            st.unlock();
            return Err(Errno::IllegalSeek);
        }
        let size = match self.vnode.stat() {
            Ok(s) => s.size as i64,
            Err(e) => {
                st.unlock();
                return Err(e);
            }
        };
        let target = match whence {
            Whence::Set => pos,
            Whence::Current => st.offset + pos,
            Whence::End => size + pos,
        };
        if target < 0 {
            st.unlock();
            return Err(Errno::InvalidArgument);
        }
        st.offset = target;
        st.unlock();
        Ok(target)
    }
}

/// A per-process descriptor table.
pub struct FileTable {
    slots: SpinLock<[Option<Arc<FileHandle>>; OPEN_MAX]>,
}

impl FileTable {
    /// Creates a table with the console pre-opened on descriptors 0/1/2.
    pub fn new_with_console() -> Result<FileTable, Errno> {
        let table = FileTable {
            slots: SpinLock::new(array_init(|_| None)),
        };
        for flags in [OpenFlags::RDONLY, OpenFlags::WRONLY, OpenFlags::WRONLY] {
            let vnode = super::open("con:", flags)?;
            table.add(FileHandle::create("con:", vnode, flags))?;
        }
        Ok(table)
    }

    /// Installs `handle` in the lowest free slot and returns the
    /// descriptor.
    ///
    /// # Errors
    /// [`Errno::TooManyOpenFiles`] if every slot is taken.
    pub fn add(&self, handle: Arc<FileHandle>) -> Result<i32, Errno> {
        let mut slots = self.slots.lock();
        for fd in 0..OPEN_MAX {
            if slots[fd].is_none() {
                slots[fd] = Some(handle);
                slots.unlock();
                return Ok(fd as i32);
            }
        }
        slots.unlock();
        Err(Errno::TooManyOpenFiles)
    }

    /// The handle at descriptor `fd`.
    ///
    /// # Errors
    /// [`Errno::BadFileDescriptor`] for out-of-range or empty slots.
    pub fn get(&self, fd: i32) -> Result<Arc<FileHandle>, Errno> {
        if !(0..OPEN_MAX as i32).contains(&fd) {
            return Err(Errno::BadFileDescriptor);
        }
        let slots = self.slots.lock();
        let h = slots[fd as usize].clone();
        slots.unlock();
        h.ok_or(Errno::BadFileDescriptor)
    }

    /// Clears descriptor `fd`. The slot's reference is dropped outside
    /// the table lock; if it was the last, the handle (and its vnode
    /// reference) goes with it.
    ///
    /// # Errors
    /// [`Errno::BadFileDescriptor`] for out-of-range or empty slots.
    pub fn remove(&self, fd: i32) -> Result<(), Errno> {
        if !(0..OPEN_MAX as i32).contains(&fd) {
            return Err(Errno::BadFileDescriptor);
        }
        let mut slots = self.slots.lock();
        let taken = slots[fd as usize].take();
        slots.unlock();
        match taken {
            Some(handle) => {
                drop(handle);
                Ok(())
            }
            None => Err(Errno::BadFileDescriptor),
        }
    }

    /// Installs `handle` at exactly `fd`, returning whatever occupied the
    /// slot. One lock section: the eviction and the installation are not
    /// separated by a window another thread could use. (`dup2` drops the
    /// evicted handle after this returns.)
    ///
    /// # Errors
    /// [`Errno::BadFileDescriptor`] for out-of-range descriptors.
    pub fn install_at(
        &self,
        fd: i32,
        handle: Arc<FileHandle>,
    ) -> Result<Option<Arc<FileHandle>>, Errno> {
        if !(0..OPEN_MAX as i32).contains(&fd) {
            return Err(Errno::BadFileDescriptor);
        }
        let mut slots = self.slots.lock();
        let evicted = slots[fd as usize].replace(handle);
        slots.unlock();
        Ok(evicted)
    }

    /// Replaces this table's slots with references to every handle in
    /// `parent`, slot for slot. The previous contents (a fresh child's
    /// console handles, in the `fork` path) are dropped.
    pub fn inherit_from(&self, parent: &FileTable) {
        let snapshot: [Option<Arc<FileHandle>>; OPEN_MAX] = {
            let theirs = parent.slots.lock();
            let snap = array_init(|i| theirs[i].clone());
            theirs.unlock();
            snap
        };
        let mut slots = self.slots.lock();
        let old = core::mem::replace(&mut *slots, snapshot);
        slots.unlock();
        drop(old);
    }
}
