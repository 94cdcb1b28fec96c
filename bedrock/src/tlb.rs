//! The software model of the MIPS-style TLB.
//!
//! Address translation hardware on this machine is a fully associative
//! table of [`NUM_TLB`] entries. Each entry pairs an `EntryHi` word (the
//! virtual page number) with an `EntryLo` word (the physical frame plus
//! [`EntryLo::VALID`] and [`EntryLo::DIRTY`] bits). On a translation miss
//! the fault handler writes a new entry into a "random" slot; on address
//! space activation the whole table is invalidated.
//!
//! All TLB writes require interrupts to be disabled: a preemption between
//! probe and write could load a stale translation.

use crate::{
    addressing::PAGE_FRAME,
    interrupt::InterruptState,
    spinlock::SpinLock,
};
use bitflags::bitflags;

/// Number of TLB entries.
pub const NUM_TLB: usize = 64;

/// Mask selecting the virtual page number bits of an `EntryHi` word.
pub const TLBHI_VPAGE: u32 = PAGE_FRAME;

/// Mask selecting the physical frame bits of an `EntryLo` word.
pub const TLBLO_PPAGE: u32 = PAGE_FRAME;

bitflags! {
    /// Flag bits of an `EntryLo` word.
    #[derive(Clone, Copy, Eq, PartialEq, Debug)]
    pub struct EntryLo: u32 {
        /// The translation is valid.
        const VALID = 0x0000_0200;
        /// The page may be written through this translation.
        const DIRTY = 0x0000_0400;
    }
}

#[derive(Clone, Copy)]
struct Entry {
    hi: u32,
    lo: u32,
}

// Invalid entries park their VPN in the kernel segment so no user address
// ever matches one.
const INVALID: Entry = Entry {
    hi: 0x8000_0000,
    lo: 0,
};

static TLB: SpinLock<TlbState> = SpinLock::new(TlbState {
    entries: [INVALID; NUM_TLB],
    next: 0,
});

struct TlbState {
    entries: [Entry; NUM_TLB],
    // Rotates like the hardware random register.
    next: usize,
}

/// Writes a translation into a pseudo-random slot.
///
/// `hi` carries the virtual page number ([`TLBHI_VPAGE`] bits); `lo`
/// carries the physical frame and flag bits.
///
/// # Panics
/// Panics if interrupts are enabled.
pub fn write_random(hi: u32, lo: u32) {
    assert_eq!(
        InterruptState::current(),
        InterruptState::Off,
        "TLB write with interrupts enabled"
    );
    let mut tlb = TLB.lock();
    let slot = tlb.next % NUM_TLB;
    tlb.next = tlb.next.wrapping_add(1);
    tlb.entries[slot] = Entry { hi, lo };
    tlb.unlock();
}

/// Invalidates every entry.
///
/// # Panics
/// Panics if interrupts are enabled.
pub fn invalidate_all() {
    assert_eq!(
        InterruptState::current(),
        InterruptState::Off,
        "TLB invalidate with interrupts enabled"
    );
    let mut tlb = TLB.lock();
    for e in tlb.entries.iter_mut() {
        *e = INVALID;
    }
    tlb.unlock();
}

/// Probes the table for a valid translation of the page containing `va`.
///
/// Returns the matching `EntryLo` word, or `None` on a miss. The refill
/// handler and tests use this to observe translation state.
pub fn probe(va: u32) -> Option<u32> {
    let vpn = va & TLBHI_VPAGE;
    let tlb = TLB.lock();
    let hit = tlb
        .entries
        .iter()
        .find(|e| e.hi & TLBHI_VPAGE == vpn && e.lo & EntryLo::VALID.bits() != 0)
        .map(|e| e.lo);
    tlb.unlock();
    hit
}
