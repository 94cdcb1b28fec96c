//! The file-object layer.
//!
//! The VFS proper is outside the kernel core; what the core relies on is
//! the [`Vnode`] contract: a reference-counted file object that can be
//! read and written at an offset, stat'ed, and asked whether it is
//! seekable. Reference counting is `Arc`: a vnode lives exactly as long
//! as something holds it.
//!
//! Two providers are built in:
//!
//! - the [`console`] device, reachable as `"con:"`, which every process
//!   gets pre-opened on descriptors 0/1/2;
//! - a minimal in-memory filesystem ([`memfs`]) with a flat namespace,
//!   enough to exercise the file syscalls and `execv` end to end.
//!
//! Open flags follow the classic encoding: the low two bits are the
//! access mode, the rest are option bits.

pub mod console;
pub mod file_table;
pub mod memfs;

pub use file_table::{FileHandle, FileTable};

use crate::Errno;
use alloc::{string::String, sync::Arc};
use bitflags::bitflags;
use spin::Once;

/// How a file is being opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    /// Reads only.
    ReadOnly,
    /// Writes only.
    WriteOnly,
    /// Both.
    ReadWrite,
}

bitflags! {
    /// Option bits of the open flags word.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct OpenOptions: u32 {
        /// Create the file if it does not exist.
        const CREAT = 0x4;
        /// With `CREAT`: fail if the file already exists.
        const EXCL = 0x8;
        /// Truncate to zero length on open.
        const TRUNC = 0x10;
    }
}

/// A decoded open-flags word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenFlags {
    /// The access mode from the low two bits.
    pub mode: AccessMode,
    /// The option bits.
    pub options: OpenOptions,
}

impl OpenFlags {
    /// Plain read-only open.
    pub const RDONLY: OpenFlags = OpenFlags {
        mode: AccessMode::ReadOnly,
        options: OpenOptions::empty(),
    };
    /// Plain write-only open.
    pub const WRONLY: OpenFlags = OpenFlags {
        mode: AccessMode::WriteOnly,
        options: OpenOptions::empty(),
    };

    /// Decodes a user-supplied flags word.
    ///
    /// # Errors
    /// Returns [`Errno::InvalidArgument`] for access mode 3 or unknown
    /// option bits.
    pub fn decode(bits: u32) -> Result<OpenFlags, Errno> {
        let mode = match bits & 0x3 {
            0 => AccessMode::ReadOnly,
            1 => AccessMode::WriteOnly,
            2 => AccessMode::ReadWrite,
            _ => return Err(Errno::InvalidArgument),
        };
        let options =
            OpenOptions::from_bits(bits & !0x3).ok_or(Errno::InvalidArgument)?;
        Ok(OpenFlags { mode, options })
    }

    /// May the holder read through this open?
    pub fn readable(&self) -> bool {
        self.mode != AccessMode::WriteOnly
    }

    /// May the holder write through this open?
    pub fn writable(&self) -> bool {
        self.mode != AccessMode::ReadOnly
    }
}

/// File metadata, as much of it as the kernel core consumes.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
}

/// The opaque file-object contract.
///
/// Offsets are explicit: a vnode has no cursor of its own. The cursor
/// lives in the [`FileHandle`], which is what descriptor slots share.
pub trait Vnode: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`; returns the count read.
    /// Zero means end of data.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, Errno>;

    /// Writes `buf` at `offset`; returns the count written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, Errno>;

    /// Does seeking on this object mean anything?
    fn is_seekable(&self) -> bool;

    /// Metadata.
    fn stat(&self) -> Result<FileStat, Errno>;
}

impl core::fmt::Debug for dyn Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("dyn Vnode").finish()
    }
}

static CONSOLE: Once<Arc<console::Console>> = Once::new();
static ROOTFS: Once<Arc<memfs::MemFs>> = Once::new();

/// Brings up the built-in providers. Later calls are ignored.
pub fn bootstrap() {
    CONSOLE.call_once(|| Arc::new(console::Console::new()));
    ROOTFS.call_once(|| Arc::new(memfs::MemFs::new()));
    log::info!("fs: console and root filesystem ready");
}

/// The console device.
pub fn console() -> &'static Arc<console::Console> {
    CONSOLE.get().expect("fs not bootstrapped")
}

/// The root filesystem.
pub fn rootfs() -> &'static Arc<memfs::MemFs> {
    ROOTFS.get().expect("fs not bootstrapped")
}

/// Resolves `path` and opens it with `flags`.
///
/// The device name `"con:"` names the console; everything else goes to
/// the root filesystem.
pub fn open(path: &str, flags: OpenFlags) -> Result<Arc<dyn Vnode>, Errno> {
    if path == "con:" {
        Ok(console().clone() as Arc<dyn Vnode>)
    } else {
        rootfs().open(path, flags)
    }
}

/// Validates a path for `chdir` and returns its canonical form.
///
/// The flat root filesystem has exactly one directory level, so this is a
/// thin passthrough: non-empty paths are accepted verbatim.
pub fn chdir(path: &str) -> Result<String, Errno> {
    if path.is_empty() {
        return Err(Errno::NoSuchEntry);
    }
    Ok(String::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decode() {
        let f = OpenFlags::decode(0).unwrap();
        assert!(f.readable() && !f.writable());
        let f = OpenFlags::decode(1 | 0x4 | 0x10).unwrap();
        assert!(!f.readable() && f.writable());
        assert!(f.options.contains(OpenOptions::CREAT | OpenOptions::TRUNC));
        assert_eq!(OpenFlags::decode(3), Err(Errno::InvalidArgument));
        assert_eq!(OpenFlags::decode(0x8000), Err(Errno::InvalidArgument));
    }
}
