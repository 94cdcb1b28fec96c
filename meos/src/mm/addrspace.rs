//! Address spaces.
//!
//! An address space owns exactly one [`PageTable`] and a resizable array
//! of [`Segment`] records, with the heap and stack segments additionally
//! held by name. Defining a region creates page-table entries for every
//! page it spans: *entries*, not frames. Frames arrive lazily on first
//! touch. The stack is a fixed 2 MiB segment at the top of user space,
//! created eagerly by [`AddrSpace::define_stack`].
//!
//! Each address space carries a unique [`AsId`]; the coremap tags user
//! frames with it, which is how cross-address-space frees are caught.

use super::page_table::PageTable;
use crate::Errno;
use alloc::vec::Vec;
use bedrock::addressing::{
    PAGE_SIZE, USERSPACE_TOP, USERSTACK, USERSTACK_BASE, USERSTACK_SIZE, Va,
};
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicUsize, Ordering};

/// The identity of an address space, as seen by the coremap.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AsId(NonZeroUsize);

impl AsId {
    /// Mints a fresh identity.
    pub fn next() -> AsId {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        AsId(NonZeroUsize::new(NEXT.fetch_add(1, Ordering::Relaxed)).unwrap())
    }
}

/// A run of virtual pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    start: Va,
    n_pages: usize,
}

impl Segment {
    /// First page of the segment.
    pub fn start(&self) -> Va {
        self.start
    }

    /// Length in pages.
    pub fn n_pages(&self) -> usize {
        self.n_pages
    }

    /// Does the segment cover `va`?
    pub fn contains(&self, va: Va) -> bool {
        let a = va.into_usize();
        let s = self.start.into_usize();
        a >= s && a < s + self.n_pages * PAGE_SIZE
    }
}

/// A per-process virtual memory container.
pub struct AddrSpace {
    id: AsId,
    pgtable: PageTable,
    segments: Vec<Option<Segment>>,
    heap: Option<Segment>,
    stack: Option<Segment>,
}

impl AddrSpace {
    /// Creates an empty address space: a fresh page table and four empty
    /// segment slots (text, data, heap, stack in the common case).
    pub fn new() -> AddrSpace {
        let id = AsId::next();
        AddrSpace {
            id,
            pgtable: PageTable::new(id),
            segments: alloc::vec![None; 4],
            heap: None,
            stack: None,
        }
    }

    /// This address space's identity.
    pub fn id(&self) -> AsId {
        self.id
    }

    /// The page table.
    pub fn page_table(&self) -> &PageTable {
        &self.pgtable
    }

    /// The stack segment, once defined.
    pub fn stack(&self) -> Option<Segment> {
        self.stack
    }

    /// The heap segment, once one exists. Nothing defines one yet (there
    /// is no `sbrk`), but the record travels through [`copy`](Self::copy)
    /// with the rest of the address space.
    pub fn heap(&self) -> Option<Segment> {
        self.heap
    }

    /// The segment covering `va`, if any.
    pub fn segment_containing(&self, va: Va) -> Option<Segment> {
        self.segments
            .iter()
            .flatten()
            .copied()
            .find(|s| s.contains(va))
    }

    fn insert_segment(&mut self, seg: Segment) {
        match self.segments.iter_mut().find(|s| s.is_none()) {
            Some(slot) => *slot = Some(seg),
            None => self.segments.push(Some(seg)),
        }
    }

    /// Defines a segment of `memsize` bytes at `vaddr` and creates page
    /// table entries for every page it spans.
    ///
    /// The permission flags are accepted but not yet enforced; every page
    /// is created writable.
    ///
    /// # Errors
    /// - [`Errno::BadAddress`]: the region does not fit in user space,
    ///   or overlaps pages that are already mapped.
    /// - [`Errno::NoMemory`]: page-table growth failed.
    pub fn define_region(
        &mut self,
        vaddr: Va,
        memsize: usize,
        _readable: bool,
        _writable: bool,
        _executable: bool,
    ) -> Result<(), Errno> {
        let base = vaddr.page_down();
        let n_pages = (vaddr.offset() + memsize).div_ceil(PAGE_SIZE);
        if base.into_usize() + n_pages * PAGE_SIZE > USERSPACE_TOP {
            return Err(Errno::BadAddress);
        }
        let seg = Segment { start: base, n_pages };
        self.insert_segment(seg);
        for i in 0..n_pages {
            self.pgtable.alloc_page(base + i * PAGE_SIZE)?;
        }
        Ok(())
    }

    /// Defines the 2 MiB stack segment at the top of user space and
    /// returns the initial stack pointer.
    ///
    /// Pages are entered eagerly (the stack does not grow on demand), but
    /// frames still arrive lazily.
    pub fn define_stack(&mut self) -> Result<Va, Errno> {
        let base = Va::new(USERSTACK_BASE).unwrap();
        let n_pages = USERSTACK_SIZE / PAGE_SIZE;
        let seg = Segment {
            start: base,
            n_pages,
        };
        self.insert_segment(seg);
        self.stack = Some(seg);
        for i in 0..n_pages {
            self.pgtable.alloc_page(base + i * PAGE_SIZE)?;
        }
        Ok(Va::new(USERSTACK).unwrap())
    }

    /// Deep-copies this address space: the page table is cloned with
    /// fresh frame copies, and every segment record (heap and stack
    /// included) is duplicated.
    pub fn copy(&self) -> Result<AddrSpace, Errno> {
        let id = AsId::next();
        let pgtable = self.pgtable.copy(id)?;
        Ok(AddrSpace {
            id,
            pgtable,
            segments: self.segments.clone(),
            heap: self.heap,
            stack: self.stack,
        })
    }

    /// Copies `bytes` into this address space at `va`, backing pages as
    /// needed. This is the kernel-side write path used by the loader and
    /// the stack builder.
    ///
    /// # Errors
    /// - [`Errno::BadAddress`]: the range leaves user space or touches
    ///   an unmapped page.
    /// - [`Errno::NoMemory`]: a backing frame could not be allocated.
    pub fn copy_out_bytes(&self, va: Va, bytes: &[u8]) -> Result<(), Errno> {
        if va.into_usize() + bytes.len() > USERSPACE_TOP {
            return Err(Errno::BadAddress);
        }
        let mut done = 0;
        while done < bytes.len() {
            let cursor = va + done;
            let page = cursor.page_down();
            let off = cursor.offset();
            let n = (bytes.len() - done).min(PAGE_SIZE - off);
            let pa = self.pgtable.ensure_backed(page)?;
            unsafe {
                let dst = pa.into_kva().as_ptr().add(off);
                core::ptr::copy_nonoverlapping(bytes[done..].as_ptr(), dst, n);
            }
            done += n;
        }
        Ok(())
    }

    /// Copies bytes out of this address space at `va` into `buf`, backing
    /// pages as needed (an untouched page reads as zeros, exactly as a
    /// fault would make it).
    pub fn copy_in_bytes(&self, va: Va, buf: &mut [u8]) -> Result<(), Errno> {
        if va.into_usize() + buf.len() > USERSPACE_TOP {
            return Err(Errno::BadAddress);
        }
        let mut done = 0;
        while done < buf.len() {
            let cursor = va + done;
            let page = cursor.page_down();
            let off = cursor.offset();
            let n = (buf.len() - done).min(PAGE_SIZE - off);
            let pa = self.pgtable.ensure_backed(page)?;
            unsafe {
                let src = pa.into_kva().as_ptr().add(off) as *const u8;
                core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), n);
            }
            done += n;
        }
        Ok(())
    }
}

impl Default for AddrSpace {
    fn default() -> Self {
        Self::new()
    }
}
