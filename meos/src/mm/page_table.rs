//! Two-level page tables with lazy frame backing.
//!
//! The 20-bit user page number splits 10/10: the top ten bits of the
//! virtual address select a first-level slot, the next ten a slot in that
//! slot's second-level array. Second-level arrays are allocated on the
//! first mapping in their range; entries are stored inline in them.
//!
//! A present entry need not be *backed*: its frame address starts at
//! [`Pa::ZERO`] and a physical frame is bound only on the first fault (or
//! the first kernel access through `uaccess`). This is what makes
//! `define_region` cheap for large, sparsely touched segments.
//!
//! Table state is guarded by one spinlock per table. `free_page` drops
//! that lock *before* releasing the backing frame, keeping the coremap
//! lock strictly below the table lock.

use super::addrspace::AsId;
use crate::Errno;
use alloc::{boxed::Box, vec::Vec};
use bedrock::{
    addressing::{Pa, USERSPACE_TOP, Va},
    spinlock::SpinLock,
};

/// Slots per level.
pub const LEVEL_ENTRIES: usize = 1024;

fn first_index(va: Va) -> usize {
    (va.into_usize() & 0xffc0_0000) >> 22
}

fn second_index(va: Va) -> usize {
    (va.into_usize() & 0x003f_f000) >> 12
}

/// One mapping: a virtual page and the physical frame backing it
/// ([`Pa::ZERO`] while unbacked).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageTableEntry {
    page: Va,
    frame: Pa,
}

impl PageTableEntry {
    /// The virtual page this entry maps.
    pub fn page(&self) -> Va {
        self.page
    }

    /// The backing frame, or [`Pa::ZERO`] if none is bound yet.
    pub fn frame(&self) -> Pa {
        self.frame
    }

    /// Has a physical frame been bound?
    pub fn is_backed(&self) -> bool {
        self.frame != Pa::ZERO
    }
}

type SecondLevel = [Option<PageTableEntry>; LEVEL_ENTRIES];

struct Levels {
    first: Vec<Option<Box<SecondLevel>>>,
    n_alloc: usize,
}

/// A per-address-space page table.
pub struct PageTable {
    owner: AsId,
    levels: SpinLock<Levels>,
}

impl PageTable {
    /// Creates an empty table whose frames will be owned by `owner`.
    pub fn new(owner: AsId) -> PageTable {
        let mut first = Vec::with_capacity(LEVEL_ENTRIES);
        first.resize_with(LEVEL_ENTRIES, || None);
        PageTable {
            owner,
            levels: SpinLock::new(Levels { first, n_alloc: 0 }),
        }
    }

    /// The address space whose frames this table owns.
    pub fn owner(&self) -> AsId {
        self.owner
    }

    /// Number of live entries.
    pub fn n_alloc(&self) -> usize {
        let levels = self.levels.lock();
        let n = levels.n_alloc;
        levels.unlock();
        n
    }

    /// Creates an (unbacked) entry for the page at `vaddr`.
    ///
    /// The caller guarantees the address is page-aligned and lies in a
    /// defined segment; both are asserted, not reported.
    ///
    /// # Errors
    /// - [`Errno::BadAddress`]: the slot is already occupied.
    pub fn alloc_page(&self, vaddr: Va) -> Result<(), Errno> {
        assert!(vaddr.is_page_aligned(), "page address unaligned");
        assert!(vaddr.into_usize() < USERSPACE_TOP);
        let (l1, l2) = (first_index(vaddr), second_index(vaddr));

        let mut levels = self.levels.lock();
        if levels.first[l1].is_none() {
            levels.first[l1] = Some(Box::new([None; LEVEL_ENTRIES]));
        }
        let slot = &mut levels.first[l1].as_mut().unwrap()[l2];
        if slot.is_some() {
            levels.unlock();
            return Err(Errno::BadAddress);
        }
        *slot = Some(PageTableEntry {
            page: vaddr,
            frame: Pa::ZERO,
        });
        levels.n_alloc += 1;
        levels.unlock();
        Ok(())
    }

    /// Removes the entry for the page at `vaddr`, releasing its backing
    /// frame if it has one. Absent entries are a no-op.
    pub fn free_page(&self, vaddr: Va) -> Result<(), Errno> {
        assert!(vaddr.is_page_aligned(), "page address unaligned");
        let (l1, l2) = (first_index(vaddr), second_index(vaddr));

        let mut levels = self.levels.lock();
        let taken = match levels.first[l1].as_mut() {
            None => None,
            Some(second) => second[l2].take(),
        };
        let Some(entry) = taken else {
            levels.unlock();
            return Ok(());
        };
        assert_eq!(entry.page, vaddr, "page table entry corrupted");
        levels.n_alloc -= 1;
        levels.unlock();

        // The frame is released outside the table lock; the coremap lock
        // stays a leaf.
        if entry.is_backed() {
            crate::mm::kcoremap().free_upage(self.owner, entry.frame)?;
        }
        Ok(())
    }

    /// Looks up the entry covering `vaddr` without allocating anything on
    /// the way.
    pub fn get_entry(&self, vaddr: Va) -> Option<PageTableEntry> {
        let (l1, l2) = (first_index(vaddr), second_index(vaddr));
        let levels = self.levels.lock();
        let entry = levels.first[l1].as_ref().and_then(|second| second[l2]);
        levels.unlock();
        entry
    }

    /// Returns the frame backing the page at `vaddr`, binding a fresh
    /// zeroed frame if the entry is present but unbacked.
    ///
    /// # Errors
    /// - [`Errno::BadAddress`]: no entry covers `vaddr`.
    /// - [`Errno::NoMemory`]: no frame could be allocated.
    pub fn ensure_backed(&self, vaddr: Va) -> Result<Pa, Errno> {
        assert!(vaddr.is_page_aligned(), "page address unaligned");
        let (l1, l2) = (first_index(vaddr), second_index(vaddr));

        let mut levels = self.levels.lock();
        let slot = match levels.first[l1].as_mut() {
            None => None,
            Some(second) => second[l2].as_mut(),
        };
        let Some(entry) = slot else {
            levels.unlock();
            return Err(Errno::BadAddress);
        };
        if entry.is_backed() {
            let pa = entry.frame;
            levels.unlock();
            return Ok(pa);
        }
        match crate::mm::kcoremap().alloc_upage(self.owner, vaddr) {
            Some(pa) => {
                entry.frame = pa;
                levels.unlock();
                Ok(pa)
            }
            None => {
                levels.unlock();
                Err(Errno::NoMemory)
            }
        }
    }

    /// Deep-copies this table for the address space `new_owner`: every
    /// live entry is recreated, and every *backed* entry gets a fresh
    /// frame with the source frame's bytes copied in. Unbacked entries
    /// stay unbacked, preserving laziness.
    ///
    /// On `ENOMEM` the partially built table is destroyed (freeing the
    /// frames it acquired) and the error is reported.
    pub fn copy(&self, new_owner: AsId) -> Result<PageTable, Errno> {
        let new = PageTable::new(new_owner);
        let coremap = crate::mm::kcoremap();

        let levels = self.levels.lock();
        let mut copied = 0usize;
        let mut failure = None;
        {
            let mut new_levels = new.levels.lock();
            'outer: for (l1, second) in levels.first.iter().enumerate() {
                let Some(second) = second else { continue };
                for (l2, entry) in second.iter().enumerate() {
                    let Some(entry) = entry else { continue };
                    let mut dup = *entry;
                    if entry.is_backed() {
                        let Some(frame) = coremap.alloc_upage(new_owner, entry.page) else {
                            failure = Some(Errno::NoMemory);
                            break 'outer;
                        };
                        if let Err(e) = coremap.copy_page(entry.frame, frame) {
                            // The frame was just handed to us; a copy
                            // failure means the coremap is corrupt.
                            panic!("copy_page failed on fresh frame: {e:?}");
                        }
                        dup.frame = frame;
                    }
                    if new_levels.first[l1].is_none() {
                        new_levels.first[l1] = Some(Box::new([None; LEVEL_ENTRIES]));
                    }
                    new_levels.first[l1].as_mut().unwrap()[l2] = Some(dup);
                    new_levels.n_alloc += 1;
                    copied += 1;
                }
            }
            new_levels.unlock();
        }
        let n_alloc = levels.n_alloc;
        levels.unlock();

        if let Some(e) = failure {
            // Dropping the partial table frees the frames it took.
            return Err(e);
        }
        debug_assert_eq!(copied, n_alloc);
        Ok(new)
    }
}

impl Drop for PageTable {
    /// Sweeps every second-level array, releasing backed frames. The
    /// table must end the sweep with no live entries.
    fn drop(&mut self) {
        let owner = self.owner;
        let levels = self.levels.get_mut();
        for second in levels.first.iter_mut().filter_map(|s| s.take()) {
            for entry in second.iter().filter_map(|e| *e) {
                levels.n_alloc -= 1;
                if entry.is_backed() {
                    crate::mm::kcoremap()
                        .free_upage(owner, entry.frame)
                        .expect("page table frame not owned at teardown");
                }
            }
        }
        assert_eq!(levels.n_alloc, 0, "page table leaked entries");
    }
}
