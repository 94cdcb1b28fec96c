//! TLB refill and address-space activation.
//!
//! The machine raises a fault whenever the TLB has no valid translation
//! for a user access. [`vm_fault`] is the refill path: look the page up in
//! the current process's page table, bind a frame if the entry is present
//! but unbacked, and write the translation into a random TLB slot. An
//! access with no page-table entry at all is an error the syscall layer
//! turns into a kill; the stack grows by pre-allocation, not on demand.
//!
//! Activation ([`as_activate`]) is a full TLB invalidate: translations are
//! not tagged per address space, so switching processes must drop them
//! all.

use crate::{Errno, thread};
use bedrock::{
    addressing::Va,
    interrupt::InterruptGuard,
    tlb::{self, EntryLo, TLBHI_VPAGE, TLBLO_PPAGE},
};

/// The kind of access that missed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// A read missed.
    Read,
    /// A write missed.
    Write,
    /// A write hit a translation marked read-only.
    ReadOnly,
}

/// Services a translation fault at `fault_va` for the current process.
///
/// # Errors
/// - [`Errno::BadAddress`]: no process, no address space, or no
///   page-table entry covers the address. The syscall layer kills the
///   process.
/// - [`Errno::NoMemory`]: the lazy backing allocation failed.
///
/// # Panics
/// A [`FaultKind::ReadOnly`] fault panics: this kernel creates every page
/// writable, so a read-only translation can only be kernel corruption.
pub fn vm_fault(kind: FaultKind, fault_va: Va) -> Result<(), Errno> {
    if kind == FaultKind::ReadOnly {
        panic!("write to read-only translation at {fault_va:?}: pages are created writable");
    }
    let proc = thread::current_process().ok_or(Errno::BadAddress)?;
    let page = fault_va.page_down();

    proc.with_addrspace(|aspace| {
        let aspace = aspace.ok_or(Errno::BadAddress)?;
        let frame = aspace.page_table().ensure_backed(page)?;

        let _intr = InterruptGuard::new();
        tlb::write_random(
            page.into_usize() as u32 & TLBHI_VPAGE,
            (frame.into_usize() as u32 & TLBLO_PPAGE)
                | (EntryLo::VALID | EntryLo::DIRTY).bits(),
        );
        Ok(())
    })
}

/// Activates the current address space by invalidating every TLB entry.
///
/// Called on context switch into a process and after `execv` installs a
/// new image. With no ASID tagging, a full flush is both necessary and
/// sufficient.
pub fn as_activate() {
    let _intr = InterruptGuard::new();
    tlb::invalidate_all();
}

/// TLB shootdown. A uniprocessor has nobody to shoot down.
pub fn tlb_shootdown() {}
