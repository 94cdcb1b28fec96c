//! A minimal in-memory filesystem.
//!
//! One flat namespace of regular files backed by byte vectors. This is
//! the simplest provider that satisfies the [`Vnode`] contract well
//! enough to exercise the file syscalls and `execv`; per-file data sits
//! behind the kernel's own reader/writer lock, so concurrent readers
//! proceed together and writers get exclusivity.

use super::{FileStat, OpenFlags, OpenOptions, Vnode};
use crate::{Errno, sync::RwLock};
use alloc::{
    collections::btree_map::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use bedrock::spinlock::SpinLock;

/// A regular file: a growable run of bytes.
pub struct MemFile {
    data: RwLock<Vec<u8>>,
}

impl MemFile {
    fn new() -> Arc<MemFile> {
        Arc::new(MemFile {
            data: RwLock::new("memfile", Vec::new()),
        })
    }

    fn truncate(&self) {
        let mut w = self.data.write();
        w.clear();
    }
}

impl Vnode for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let data = self.data.read();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        let mut data = self.data.write();
        let offset = offset as usize;
        if data.len() < offset {
            // Writing past the end zero-fills the gap, like a sparse
            // file materialized.
            data.resize(offset, 0);
        }
        let overlap = buf.len().min(data.len() - offset);
        data[offset..offset + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        Ok(buf.len())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn stat(&self) -> Result<FileStat, Errno> {
        let data = self.data.read();
        Ok(FileStat {
            size: data.len() as u64,
        })
    }
}

/// The flat in-memory filesystem.
pub struct MemFs {
    files: SpinLock<BTreeMap<String, Arc<MemFile>>>,
}

impl MemFs {
    /// Creates an empty filesystem.
    pub fn new() -> MemFs {
        MemFs {
            files: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Opens `path`, honoring `CREAT`/`EXCL`/`TRUNC`.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Arc<dyn Vnode>, Errno> {
        if path.is_empty() {
            return Err(Errno::NoSuchEntry);
        }
        let mut files = self.files.lock();
        let existing = files.get(path).cloned();
        let file = match existing {
            Some(f) => {
                if flags.options.contains(OpenOptions::CREAT | OpenOptions::EXCL) {
                    files.unlock();
                    return Err(Errno::FileExists);
                }
                files.unlock();
                if flags.options.contains(OpenOptions::TRUNC) && flags.writable() {
                    f.truncate();
                }
                f
            }
            None => {
                if !flags.options.contains(OpenOptions::CREAT) {
                    files.unlock();
                    return Err(Errno::NoSuchEntry);
                }
                let f = MemFile::new();
                files.insert(path.to_string(), f.clone());
                files.unlock();
                f
            }
        };
        Ok(file as Arc<dyn Vnode>)
    }

    /// Seeds a file with contents, creating or replacing it. This is how
    /// boot (or a test) installs program images.
    pub fn install(&self, path: &str, contents: &[u8]) {
        let f = MemFile::new();
        {
            let mut w = f.data.write();
            w.extend_from_slice(contents);
        }
        let mut files = self.files.lock();
        files.insert(path.to_string(), f);
        files.unlock();
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}
