//! Memory management.
//!
//! Three layers, leaves first:
//!
//! 1. [`coremap`]: the physical frame allocator. Bootstrapped once over
//!    the window of RAM above the kernel image; tracks every managed frame
//!    and serves contiguous kernel runs and single user frames.
//! 2. [`page_table`]: per-address-space two-level tables with lazy frame
//!    backing.
//! 3. [`addrspace`] + [`fault`]: segments, the user stack, deep copies
//!    for `fork`, and the TLB refill path.

pub mod addrspace;
pub mod coremap;
pub mod fault;
pub mod page_table;

pub use addrspace::{AddrSpace, AsId, Segment};
pub use coremap::Coremap;
pub use fault::{FaultKind, as_activate, tlb_shootdown, vm_fault};
pub use page_table::{PageTable, PageTableEntry};

use bedrock::addressing::{Kva, Pa};
use spin::Once;

static KCOREMAP: Once<&'static Coremap> = Once::new();

/// Bootstraps the virtual memory system: places the system coremap at
/// `first_free` and hands it the window up to `ram_size`.
///
/// Must run before any allocation; later calls are ignored.
pub fn bootstrap(first_free: Pa, ram_size: usize) {
    let cm = KCOREMAP.call_once(|| Coremap::bootstrap(first_free, ram_size));
    log::info!(
        "vm: coremap manages {} frames starting at {:?}",
        cm.n_mapped(),
        cm.first_paddr()
    );
}

/// The system coremap.
///
/// # Panics
/// Panics before [`bootstrap`].
pub fn kcoremap() -> &'static Coremap {
    KCOREMAP.get().expect("vm not bootstrapped")
}

/// Allocates `npages` contiguous kernel pages. Returns the kernel virtual
/// address of the run, or `None` when memory is exhausted or fragmented.
pub fn alloc_kpages(npages: usize) -> Option<Kva> {
    kcoremap().alloc_kpages(npages)
}

/// Frees a kernel-page run previously returned by [`alloc_kpages`].
pub fn free_kpages(addr: Kva) {
    kcoremap().free_kpages(addr)
}

/// Bytes of managed memory currently allocated. Unlocked snapshot.
pub fn used_bytes() -> usize {
    kcoremap().used_bytes()
}
