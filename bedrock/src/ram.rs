//! The physical memory window.
//!
//! On the real machine the boot loader hands the kernel a contiguous run of
//! RAM and the kernel direct-maps it. Here the window is a simulated arena:
//! [`power_on`] grabs a page-aligned block from the host allocator once,
//! registers its base, and from then on `Pa <-> Kva` conversion is the same
//! constant-offset arithmetic a direct map gives on hardware.
//!
//! The window is powered on exactly once per machine lifetime and is never
//! released; physical memory does not come and go.

use crate::addressing::{Kva, PAGE_SIZE, Pa};
use spin::Once;

struct RamWindow {
    base: usize,
    size: usize,
}

static RAM: Once<RamWindow> = Once::new();

/// Powers on a simulated RAM window of `npages` pages and returns its size
/// in bytes.
///
/// Physical addresses run from `0` to the returned size. Calling this a
/// second time is a no-op that returns the existing window's size.
pub fn power_on(npages: usize) -> usize {
    assert!(npages > 0, "a machine needs at least one page of RAM");
    let window = RAM.call_once(|| {
        let size = npages * PAGE_SIZE;
        let layout = core::alloc::Layout::from_size_align(size, PAGE_SIZE).unwrap();
        // The arena lives for the machine lifetime; deliberately leaked.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "failed to reserve the RAM window");
        RamWindow {
            base: base as usize,
            size,
        }
    });
    window.size
}

/// Registers an externally provided RAM window (a real machine port would
/// call this with the loader-supplied region).
///
/// # Safety
/// `base..base + size` must be valid, writable, page-aligned memory that
/// outlives the kernel.
pub unsafe fn power_on_at(base: *mut u8, size: usize) {
    assert_eq!(base as usize % PAGE_SIZE, 0);
    assert_eq!(size % PAGE_SIZE, 0);
    RAM.call_once(|| RamWindow {
        base: base as usize,
        size,
    });
}

fn window() -> &'static RamWindow {
    RAM.get().expect("RAM window is not powered on")
}

/// Total bytes of physical memory.
pub fn size() -> usize {
    window().size
}

/// The kernel virtual address mapping physical address `pa`.
pub fn kva_of(pa: Pa) -> Kva {
    let w = window();
    assert!(
        pa.into_usize() < w.size,
        "{pa:?} is outside the physical window"
    );
    Kva::new(w.base + pa.into_usize())
}

/// The physical address mapped at `kva`, or `None` if the address is not
/// part of the kernel direct map at all.
pub fn try_pa_of(kva: Kva) -> Option<Pa> {
    let w = window();
    let addr = kva.into_usize();
    if addr >= w.base && addr < w.base + w.size {
        Pa::new(addr - w.base)
    } else {
        None
    }
}

/// The physical address mapped at kernel virtual address `kva`.
pub fn pa_of(kva: Kva) -> Pa {
    let w = window();
    let addr = kva.into_usize();
    assert!(
        addr >= w.base && addr < w.base + w.size,
        "{kva:?} is outside the kernel direct map"
    );
    Pa::new(addr - w.base).unwrap()
}
