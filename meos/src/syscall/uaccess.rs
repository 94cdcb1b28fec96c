//! Safe user-memory access.
//!
//! The kernel must never trust a user pointer: it may dangle, alias
//! kernel memory, or point at pages the process never mapped. All
//! syscall-side traffic with user memory goes through the one-shot
//! wrappers here, which bound-check the range against user space, walk
//! the current process's page table, and fault frames in exactly the way
//! a hardware access would. A bad address surfaces as
//! [`Errno::BadAddress`]; nothing is partially trusted.
//!
//! The wrappers are one-shot (they consume themselves on use), so a
//! checked address cannot be re-used after the check goes stale.

use crate::{Errno, thread};
use alloc::{string::String, vec, vec::Vec};
use bedrock::addressing::Va;

fn with_current_aspace<R>(
    f: impl FnOnce(&crate::mm::AddrSpace) -> Result<R, Errno>,
) -> Result<R, Errno> {
    let proc = thread::current_process().ok_or(Errno::BadAddress)?;
    proc.with_addrspace(|aspace| match aspace {
        Some(aspace) => f(aspace),
        None => Err(Errno::BadAddress),
    })
}

fn user_range(addr: usize, len: usize) -> Result<Va, Errno> {
    let end = addr.checked_add(len).ok_or(Errno::BadAddress)?;
    if Va::new(end).is_none() {
        return Err(Errno::BadAddress);
    }
    Va::new(addr).ok_or(Errno::BadAddress)
}

/// A one-shot, read-only user pointer to a `T`.
pub struct UserPtrRO<T: Copy> {
    addr: usize,
    _ty: core::marker::PhantomData<T>,
}

impl<T: Copy> UserPtrRO<T> {
    /// Wraps a raw user address.
    pub fn new(addr: usize) -> Self {
        UserPtrRO {
            addr,
            _ty: core::marker::PhantomData,
        }
    }

    /// Reads the value, consuming the pointer.
    pub fn get(self) -> Result<T, Errno> {
        let size = core::mem::size_of::<T>();
        let va = user_range(self.addr, size)?;
        with_current_aspace(|aspace| {
            let mut raw = vec![0u8; size];
            aspace.copy_in_bytes(va, &mut raw)?;
            // T: Copy and the syscall layer only moves plain words and
            // structs of words across this boundary.
            let mut value = core::mem::MaybeUninit::<T>::uninit();
            unsafe {
                core::ptr::copy_nonoverlapping(
                    raw.as_ptr(),
                    value.as_mut_ptr() as *mut u8,
                    size,
                );
                Ok(value.assume_init())
            }
        })
    }
}

/// A one-shot, write-only user pointer to a `T`.
pub struct UserPtrWO<T: Copy> {
    addr: usize,
    _ty: core::marker::PhantomData<T>,
}

impl<T: Copy> UserPtrWO<T> {
    /// Wraps a raw user address.
    pub fn new(addr: usize) -> Self {
        UserPtrWO {
            addr,
            _ty: core::marker::PhantomData,
        }
    }

    /// Writes `value`, consuming the pointer. Returns the bytes written.
    pub fn put(self, value: T) -> Result<usize, Errno> {
        let size = core::mem::size_of::<T>();
        let va = user_range(self.addr, size)?;
        with_current_aspace(|aspace| {
            let raw = unsafe {
                core::slice::from_raw_parts(&value as *const T as *const u8, size)
            };
            aspace.copy_out_bytes(va, raw)?;
            Ok(size)
        })
    }
}

/// A one-shot, read-only user byte slice.
pub struct UserU8SliceRO {
    addr: usize,
    len: usize,
}

impl UserU8SliceRO {
    /// Wraps a raw user range.
    pub fn new(addr: usize, len: usize) -> Self {
        UserU8SliceRO { addr, len }
    }

    /// Copies the slice into kernel memory.
    pub fn read(self) -> Result<Vec<u8>, Errno> {
        let va = user_range(self.addr, self.len)?;
        with_current_aspace(|aspace| {
            let mut buf = vec![0u8; self.len];
            aspace.copy_in_bytes(va, &mut buf)?;
            Ok(buf)
        })
    }
}

/// A one-shot, write-only user byte slice.
pub struct UserU8SliceWO {
    addr: usize,
    len: usize,
}

impl UserU8SliceWO {
    /// Wraps a raw user range.
    pub fn new(addr: usize, len: usize) -> Self {
        UserU8SliceWO { addr, len }
    }

    /// Copies `bytes` (at most the wrapped length) out to user memory.
    /// Returns the bytes written.
    pub fn write(self, bytes: &[u8]) -> Result<usize, Errno> {
        let n = bytes.len().min(self.len);
        let va = user_range(self.addr, n)?;
        with_current_aspace(|aspace| {
            aspace.copy_out_bytes(va, &bytes[..n])?;
            Ok(n)
        })
    }
}

/// A NUL-terminated user string.
pub struct UserCString {
    addr: usize,
}

impl UserCString {
    /// Wraps a raw user address.
    pub fn new(addr: usize) -> Self {
        UserCString { addr }
    }

    /// Copies the string into kernel memory, bounded by `max` bytes
    /// including the terminator.
    ///
    /// # Errors
    /// - [`Errno::NameTooLong`]: no NUL within `max` bytes.
    /// - [`Errno::BadAddress`]: the walk leaves user space or hits an
    ///   unmapped page.
    /// - [`Errno::InvalidArgument`]: not valid UTF-8.
    pub fn read(self, max: usize) -> Result<String, Errno> {
        with_current_aspace(|aspace| {
            let mut out: Vec<u8> = Vec::new();
            let mut cursor = self.addr;
            loop {
                if out.len() >= max {
                    return Err(Errno::NameTooLong);
                }
                // Chunked walk: cross at most one page per copy.
                let page_rest = bedrock::addressing::PAGE_SIZE
                    - (cursor & bedrock::addressing::PAGE_MASK);
                let chunk = page_rest.min(max - out.len());
                let va = user_range(cursor, chunk)?;
                let mut buf = vec![0u8; chunk];
                aspace.copy_in_bytes(va, &mut buf)?;
                match buf.iter().position(|&b| b == 0) {
                    Some(nul) => {
                        out.extend_from_slice(&buf[..nul]);
                        break;
                    }
                    None => {
                        out.extend_from_slice(&buf);
                        cursor += chunk;
                    }
                }
            }
            String::from_utf8(out).map_err(|_| Errno::InvalidArgument)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mm::AddrSpace, proc::Process, test_support};
    use bedrock::addressing::{PAGE_SIZE, USERSPACE_TOP};

    // uaccess reads "the current process", so each test runs its body on
    // a process-bound thread.
    fn in_process(f: impl FnOnce() + Send + 'static) {
        test_support::boot();
        let proc = Process::new_for_test("uaccess");
        let mut aspace = AddrSpace::new();
        aspace
            .define_region(
                Va::new(0x0100_0000).unwrap(),
                4 * PAGE_SIZE,
                true,
                true,
                false,
            )
            .unwrap();
        proc.set_addrspace(aspace);
        crate::thread::ThreadBuilder::new("uaccess")
            .attach_process(proc)
            .spawn(f)
            .unwrap()
            .join();
    }

    #[test]
    fn word_round_trip() {
        in_process(|| {
            UserPtrWO::<u32>::new(0x0100_0010).put(0xdead_beef).unwrap();
            assert_eq!(
                UserPtrRO::<u32>::new(0x0100_0010).get().unwrap(),
                0xdead_beef
            );
        });
    }

    #[test]
    fn unmapped_and_kernel_addresses_fault() {
        in_process(|| {
            assert_eq!(
                UserPtrRO::<u32>::new(0x7000_0000).get().unwrap_err(),
                Errno::BadAddress
            );
            assert_eq!(
                UserPtrWO::<u32>::new(USERSPACE_TOP).put(1).unwrap_err(),
                Errno::BadAddress
            );
            assert_eq!(
                UserU8SliceRO::new(usize::MAX - 2, 8).read().unwrap_err(),
                Errno::BadAddress
            );
        });
    }

    #[test]
    fn cstring_crosses_pages_and_respects_bounds() {
        in_process(|| {
            // Lay a string across the first page boundary of the region.
            let base = 0x0100_0000 + PAGE_SIZE - 3;
            UserU8SliceWO::new(base, 8).write(b"abcdef\0").unwrap();
            assert_eq!(UserCString::new(base).read(64).unwrap(), "abcdef");
            assert_eq!(
                UserCString::new(base).read(4).unwrap_err(),
                Errno::NameTooLong
            );
        });
    }

    #[test]
    fn slice_write_respects_length() {
        in_process(|| {
            let n = UserU8SliceWO::new(0x0100_0100, 3).write(b"wxyz").unwrap();
            assert_eq!(n, 3);
            assert_eq!(
                UserU8SliceRO::new(0x0100_0100, 3).read().unwrap(),
                b"wxy".to_vec()
            );
        });
    }
}
