//! The console device, `"con:"`.
//!
//! Writes go to the kernel console sink; reads drain an input queue the
//! machine (or a test) feeds. The console has no notion of position, so
//! it is not seekable and `lseek` on it reports `ESPIPE`.

use super::{FileStat, Vnode};
use crate::Errno;
use alloc::collections::vec_deque::VecDeque;
use bedrock::spinlock::SpinLock;

/// The console device.
pub struct Console {
    input: SpinLock<VecDeque<u8>>,
}

impl Console {
    /// Creates the device with an empty input queue.
    pub fn new() -> Console {
        Console {
            input: SpinLock::new(VecDeque::new()),
        }
    }

    /// Queues bytes for subsequent reads. The interrupt path of a real
    /// UART would call this; tests call it directly.
    pub fn feed_input(&self, bytes: &[u8]) {
        let mut q = self.input.lock();
        q.extend(bytes.iter().copied());
        q.unlock();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Vnode for Console {
    fn read_at(&self, buf: &mut [u8], _offset: u64) -> Result<usize, Errno> {
        let mut q = self.input.lock();
        let mut n = 0;
        while n < buf.len() {
            match q.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        q.unlock();
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], _offset: u64) -> Result<usize, Errno> {
        bedrock::print!("{}", core::str::from_utf8(buf).unwrap_or("<non-utf8>"));
        Ok(buf.len())
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn stat(&self) -> Result<FileStat, Errno> {
        Ok(FileStat { size: 0 })
    }
}
