//! The coremap: the physical page-frame allocator.
//!
//! One [`CoremapEntry`] describes every usable frame above the kernel
//! image. The coremap itself lives *inside* the memory it would otherwise
//! manage: [`Coremap::bootstrap`] carves the header and the entry array
//! out of the first free physical pages, and the managed window begins
//! just past them. Those bootstrap pages are never mapped by the coremap.
//!
//! Each entry packs its bookkeeping into a 32-bit info word:
//!
//! ```text
//! bit 0      allocated
//! bit 1      member of a contiguous run (never set on the run's first frame)
//! bit 2      writable
//! bits 3-11  reserved
//! bits 12-31 frame number (physical address >> 12)
//! ```
//!
//! Kernel allocations ([`alloc_kpages`](Coremap::alloc_kpages)) are
//! contiguous runs found by linear scan; user allocations are always a
//! single frame tagged with the owning address space and the virtual page
//! it backs. A run is freed by releasing its first frame and walking
//! forward while the contig bit holds, bounded by the mapped-frame count.
//!
//! Every mutating operation holds the coremap spinlock for its whole
//! critical section. [`used_bytes`](Coremap::used_bytes) takes no lock
//! and may be stale by the time the caller reads it.

use super::addrspace::AsId;
use crate::Errno;
use bedrock::{
    addressing::{Kva, PAGE_FRAME, PAGE_SIZE, Pa, Va},
    spinlock::SpinLock,
};
use bitflags::bitflags;
use core::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    /// Flag bits of a frame's info word.
    #[derive(Clone, Copy, Eq, PartialEq, Debug)]
    pub struct FrameFlags: u32 {
        /// The frame is allocated.
        const ALLOCATED = 1 << 0;
        /// The frame continues a contiguous run started by an earlier
        /// frame.
        const CONTIG = 1 << 1;
        /// The frame may be written.
        const WRITABLE = 1 << 2;
    }
}

/// Per-frame bookkeeping.
#[repr(C)]
struct CoremapEntry {
    /// The address space this frame backs; `None` for kernel frames.
    owner: Option<AsId>,
    /// The virtual address the frame is bound to.
    vaddr: usize,
    /// Packed status word; see the module docs.
    info: u32,
}

impl CoremapEntry {
    fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(self.info)
    }

    fn set_flags(&mut self, flags: FrameFlags) {
        self.info = (self.info & PAGE_FRAME) | flags.bits();
    }

    fn is_allocated(&self) -> bool {
        self.flags().contains(FrameFlags::ALLOCATED)
    }

    fn is_contig(&self) -> bool {
        self.flags().contains(FrameFlags::CONTIG)
    }

    fn is_writable(&self) -> bool {
        self.flags().contains(FrameFlags::WRITABLE)
    }

    fn paddr(&self) -> Pa {
        Pa::new((self.info & PAGE_FRAME) as usize).unwrap()
    }
}

/// The frame allocator. See the module docs for the data model.
pub struct Coremap {
    n_mapped: usize,
    first_paddr: Pa,
    last_paddr: Pa,
    n_free: AtomicUsize,
    map: SpinLock<&'static mut [CoremapEntry]>,
}

impl Coremap {
    /// Builds a coremap over the physical window
    /// `[first_free, ram_size)`, placing its own header and entry array
    /// at `first_free`.
    ///
    /// # Panics
    /// Panics if `first_free` is not page-aligned or the window is too
    /// small to hold the coremap and at least one managed frame.
    pub fn bootstrap(first_free: Pa, ram_size: usize) -> &'static Coremap {
        assert!(first_free.is_page_aligned(), "first free address unaligned");
        assert!(first_free.into_usize() < ram_size, "no memory past the kernel");

        let pages_free = (ram_size - first_free.into_usize()) / PAGE_SIZE;
        let map_bytes = core::mem::size_of::<Coremap>()
            + pages_free * core::mem::size_of::<CoremapEntry>();
        let n_map_pages = map_bytes.div_ceil(PAGE_SIZE);
        assert!(n_map_pages < pages_free, "coremap would consume all of RAM");

        let n_mapped = pages_free - n_map_pages;
        let first_paddr = first_free + n_map_pages * PAGE_SIZE;
        let header = first_free.into_kva().as_ptr() as *mut Coremap;

        unsafe {
            let entries = header.add(1) as *mut CoremapEntry;
            for i in 0..n_mapped {
                let pa = first_paddr + i * PAGE_SIZE;
                entries.add(i).write(CoremapEntry {
                    owner: None,
                    vaddr: 0,
                    info: pa.into_usize() as u32 & PAGE_FRAME,
                });
            }
            header.write(Coremap {
                n_mapped,
                first_paddr,
                last_paddr: Pa::new(ram_size).unwrap(),
                n_free: AtomicUsize::new(n_mapped),
                map: SpinLock::new(core::slice::from_raw_parts_mut(entries, n_mapped)),
            });
            &*header
        }
    }

    /// Number of frames the coremap manages.
    pub fn n_mapped(&self) -> usize {
        self.n_mapped
    }

    /// First physical address of the managed window.
    pub fn first_paddr(&self) -> Pa {
        self.first_paddr
    }

    /// Bytes currently allocated. Unlocked snapshot; may be stale on
    /// return.
    pub fn used_bytes(&self) -> usize {
        (self.n_mapped - self.n_free.load(Ordering::Relaxed)) * PAGE_SIZE
    }

    /// Allocates `npages` physically contiguous frames for the kernel and
    /// returns the kernel virtual address of the run, or `None` if no such
    /// run exists. `npages == 0` always fails.
    pub fn alloc_kpages(&self, npages: usize) -> Option<Kva> {
        if npages == 0 {
            return None;
        }
        let mut map = self.map.lock();
        if self.n_free.load(Ordering::Relaxed) < npages {
            map.unlock();
            return None;
        }

        let mut start = 0;
        let mut run = 0;
        for i in 0..self.n_mapped {
            if map[i].is_allocated() {
                run = 0;
                continue;
            }
            if run == 0 {
                start = i;
            }
            run += 1;
            if run == npages {
                break;
            }
        }
        if run != npages {
            // Enough free frames, but not contiguously. No compaction.
            map.unlock();
            return None;
        }

        for i in start..start + npages {
            let flags = if i == start {
                FrameFlags::ALLOCATED | FrameFlags::WRITABLE
            } else {
                FrameFlags::ALLOCATED | FrameFlags::CONTIG | FrameFlags::WRITABLE
            };
            let kva = map[i].paddr().into_kva();
            map[i].set_flags(flags);
            map[i].owner = None;
            map[i].vaddr = kva.into_usize();
        }
        self.n_free.fetch_sub(npages, Ordering::Relaxed);
        let kva = map[start].paddr().into_kva();
        map.unlock();

        unsafe { core::ptr::write_bytes(kva.as_ptr(), 0, npages * PAGE_SIZE) };
        Some(kva)
    }

    /// Frees the contiguous run starting at `addr`.
    ///
    /// A misaligned address, an address outside the managed window, or an
    /// unallocated frame makes this a no-op; freeing is forgiving the way
    /// `kfree(NULL)` is.
    pub fn free_kpages(&self, addr: Kva) {
        if addr.into_usize() % PAGE_SIZE != 0 {
            return;
        }
        let Some(pa) = bedrock::ram::try_pa_of(addr) else {
            return;
        };
        let mut map = self.map.lock();
        if pa < self.first_paddr || pa >= self.last_paddr {
            map.unlock();
            return;
        }
        let mut idx = (pa - self.first_paddr) / PAGE_SIZE;
        if !map[idx].is_allocated() {
            map.unlock();
            return;
        }

        let first_flags = map[idx].flags() - FrameFlags::ALLOCATED;
        map[idx].set_flags(first_flags);
        self.n_free.fetch_add(1, Ordering::Relaxed);
        idx += 1;
        // The walk is bounded by the mapped-frame count; a run ending at
        // the last frame has no sentinel past it.
        while idx < self.n_mapped && map[idx].is_allocated() && map[idx].is_contig() {
            let flags = map[idx].flags() - FrameFlags::ALLOCATED;
            map[idx].set_flags(flags);
            self.n_free.fetch_add(1, Ordering::Relaxed);
            idx += 1;
        }
        map.unlock();
    }

    /// Allocates one frame for user space, owned by `owner` and backing
    /// the virtual page `vaddr`. Returns the frame's physical address, or
    /// `None` if memory is exhausted. The frame is zeroed.
    pub fn alloc_upage(&self, owner: AsId, vaddr: Va) -> Option<Pa> {
        let mut map = self.map.lock();
        let idx = (0..self.n_mapped).find(|&i| !map[i].is_allocated());
        let Some(idx) = idx else {
            map.unlock();
            return None;
        };
        map[idx].set_flags(FrameFlags::ALLOCATED | FrameFlags::WRITABLE);
        map[idx].owner = Some(owner);
        map[idx].vaddr = vaddr.into_usize();
        self.n_free.fetch_sub(1, Ordering::Relaxed);
        let pa = map[idx].paddr();
        map.unlock();

        unsafe { core::ptr::write_bytes(pa.into_kva().as_ptr(), 0, PAGE_SIZE) };
        Some(pa)
    }

    /// Frees the user frame at `paddr`.
    ///
    /// # Errors
    /// - [`Errno::InvalidArgument`]: misaligned address or unallocated
    ///   frame.
    /// - [`Errno::BadAddress`]: outside the managed window.
    /// - [`Errno::OperationNotPermitted`]: `owner` does not own the
    ///   frame.
    pub fn free_upage(&self, owner: AsId, paddr: Pa) -> Result<(), Errno> {
        if !paddr.is_page_aligned() {
            return Err(Errno::InvalidArgument);
        }
        let mut map = self.map.lock();
        if paddr < self.first_paddr || paddr >= self.last_paddr {
            map.unlock();
            return Err(Errno::BadAddress);
        }
        let idx = (paddr - self.first_paddr) / PAGE_SIZE;
        // Range-check against the mapped-frame count, not the (mutable)
        // free count.
        if idx >= self.n_mapped {
            map.unlock();
            return Err(Errno::BadAddress);
        }
        if !map[idx].is_allocated() {
            map.unlock();
            return Err(Errno::InvalidArgument);
        }
        if map[idx].owner != Some(owner) {
            map.unlock();
            return Err(Errno::OperationNotPermitted);
        }
        map[idx].owner = None;
        map[idx].vaddr = 0;
        map[idx].set_flags(FrameFlags::empty());
        self.n_free.fetch_add(1, Ordering::Relaxed);
        map.unlock();
        Ok(())
    }

    /// Copies one page of bytes from frame `src` to frame `dest` through
    /// the kernel direct map.
    ///
    /// # Errors
    /// - [`Errno::InvalidArgument`]: misaligned or identical addresses,
    ///   or an unallocated source.
    /// - [`Errno::BadAddress`]: outside the managed window.
    /// - [`Errno::OperationNotPermitted`]: `dest` is not allocated and
    ///   writable.
    pub fn copy_page(&self, src: Pa, dest: Pa) -> Result<(), Errno> {
        if !src.is_page_aligned() || !dest.is_page_aligned() || src == dest {
            return Err(Errno::InvalidArgument);
        }
        let map = self.map.lock();
        for pa in [src, dest] {
            if pa < self.first_paddr || pa >= self.last_paddr {
                map.unlock();
                return Err(Errno::BadAddress);
            }
        }
        let src_idx = (src - self.first_paddr) / PAGE_SIZE;
        let dest_idx = (dest - self.first_paddr) / PAGE_SIZE;
        if !map[src_idx].is_allocated() {
            map.unlock();
            return Err(Errno::InvalidArgument);
        }
        if !map[dest_idx].is_allocated() || !map[dest_idx].is_writable() {
            map.unlock();
            return Err(Errno::OperationNotPermitted);
        }
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.into_kva().as_ptr() as *const u8,
                dest.into_kva().as_ptr(),
                PAGE_SIZE,
            );
        }
        map.unlock();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    // Carve a private physical window out of the global coremap and build
    // an isolated coremap over it, so allocation accounting is exact no
    // matter what other tests are doing.
    fn private_coremap(window_pages: usize) -> &'static Coremap {
        test_support::boot();
        let kva = crate::mm::kcoremap()
            .alloc_kpages(window_pages)
            .expect("test window");
        let first = kva.into_pa();
        Coremap::bootstrap(first, first.into_usize() + window_pages * PAGE_SIZE)
    }

    fn as_id() -> AsId {
        AsId::next()
    }

    #[test]
    fn bootstrap_self_placement() {
        let cm = private_coremap(64);
        // The coremap does not track its own pages: the managed window
        // starts past the header+array, and every frame starts free.
        assert!(cm.n_mapped() < 64);
        assert!(cm.first_paddr().is_page_aligned());
        assert_eq!(cm.used_bytes(), 0);
    }

    #[test]
    fn kpage_round_trip() {
        // Scenario: allocate 4, allocate 1, free the 4, and a 3-page run
        // must fit in the hole.
        let cm = private_coremap(64);
        let v1 = cm.alloc_kpages(4).unwrap();
        let v2 = cm.alloc_kpages(1).unwrap();
        assert_eq!(cm.used_bytes(), 5 * PAGE_SIZE);
        assert_ne!(v1, v2);

        cm.free_kpages(v1);
        assert_eq!(cm.used_bytes(), PAGE_SIZE);

        let v3 = cm.alloc_kpages(3).unwrap();
        assert!(
            v3 >= v1 && v3 < v1 + 4 * PAGE_SIZE,
            "3-page run should land in the freed 4-page hole"
        );
        assert_eq!(cm.used_bytes(), 4 * PAGE_SIZE);
        cm.free_kpages(v3);
        cm.free_kpages(v2);
        assert_eq!(cm.used_bytes(), 0);
    }

    #[test]
    fn runs_do_not_overlap() {
        let cm = private_coremap(64);
        let a = cm.alloc_kpages(3).unwrap();
        let b = cm.alloc_kpages(3).unwrap();
        let c = cm.alloc_kpages(2).unwrap();
        let runs = [(a, 3), (b, 3), (c, 2)];
        for (i, &(start, len)) in runs.iter().enumerate() {
            for &(other, olen) in &runs[i + 1..] {
                let (s1, e1) = (start.into_usize(), start.into_usize() + len * PAGE_SIZE);
                let (s2, e2) = (other.into_usize(), other.into_usize() + olen * PAGE_SIZE);
                assert!(e1 <= s2 || e2 <= s1, "allocated runs overlap");
            }
        }
        for (v, _) in runs {
            cm.free_kpages(v);
        }
    }

    #[test]
    fn zero_and_oversized_allocations_fail_cleanly() {
        let cm = private_coremap(16);
        assert!(cm.alloc_kpages(0).is_none());
        let before = cm.used_bytes();
        assert!(cm.alloc_kpages(cm.n_mapped() + 1).is_none());
        assert_eq!(cm.used_bytes(), before, "failed alloc changed state");
    }

    #[test]
    fn free_is_forgiving() {
        let cm = private_coremap(16);
        let v = cm.alloc_kpages(2).unwrap();
        // Unaligned, never-allocated, below-window: all no-ops.
        cm.free_kpages(v + 1);
        cm.free_kpages(v + 2 * PAGE_SIZE);
        cm.free_kpages(Kva::new(0x10));
        assert_eq!(cm.used_bytes(), 2 * PAGE_SIZE);
        cm.free_kpages(v);
        assert_eq!(cm.used_bytes(), 0);
        // Double free is also a no-op.
        cm.free_kpages(v);
        assert_eq!(cm.used_bytes(), 0);
    }

    #[test]
    fn trailing_run_walk_is_bounded() {
        let cm = private_coremap(16);
        // Occupy the whole window with one run, then free it: the forward
        // walk must stop at the last mapped frame.
        let n = cm.n_mapped();
        let v = cm.alloc_kpages(n).unwrap();
        assert_eq!(cm.used_bytes(), n * PAGE_SIZE);
        cm.free_kpages(v);
        assert_eq!(cm.used_bytes(), 0);
    }

    #[test]
    fn upage_ownership() {
        let cm = private_coremap(16);
        let me = as_id();
        let intruder = as_id();
        let va = Va::new(0x1000).unwrap();
        let pa = cm.alloc_upage(me, va).unwrap();
        assert!(pa.is_page_aligned());

        assert_eq!(
            cm.free_upage(intruder, pa),
            Err(Errno::OperationNotPermitted)
        );
        assert_eq!(cm.free_upage(me, pa + 1), Err(Errno::InvalidArgument));
        assert_eq!(
            cm.free_upage(me, Pa::new(0).unwrap()),
            Err(Errno::BadAddress)
        );
        assert_eq!(cm.free_upage(me, pa), Ok(()));
        assert_eq!(cm.free_upage(me, pa), Err(Errno::InvalidArgument));
        assert_eq!(cm.used_bytes(), 0);
    }

    #[test]
    fn copy_page_moves_bytes() {
        let cm = private_coremap(16);
        let me = as_id();
        let src = cm.alloc_upage(me, Va::new(0x1000).unwrap()).unwrap();
        let dest = cm.alloc_upage(me, Va::new(0x2000).unwrap()).unwrap();
        unsafe {
            src.into_kva().as_page_slice().fill(0xa5);
        }
        cm.copy_page(src, dest).unwrap();
        unsafe {
            assert!(dest.into_kva().as_page_slice().iter().all(|&b| b == 0xa5));
        }
        assert_eq!(cm.copy_page(src, src), Err(Errno::InvalidArgument));
        cm.free_upage(me, src).unwrap();
        cm.free_upage(me, dest).unwrap();
    }
}
