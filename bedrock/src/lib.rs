//! # Bedrock: the machine layer of MEOS.
//!
//! MEOS targets a 32-bit MIPS-like machine. This crate is everything the
//! kernel core needs to know about that machine, and nothing more:
//!
//! - [`addressing`]: physical, user-virtual and kernel-virtual address
//!   types, page constants, and the user-space memory map.
//! - [`ram`]: the physical memory window. The kernel's view of physical
//!   memory is a direct map: `kva = ram_base + pa`. On real hardware the
//!   window is wired up by the boot loader; here it is powered on as a
//!   simulated arena so the whole kernel runs and tests on a host.
//! - [`interrupt`]: the interrupt-enable model of a uniprocessor:
//!   a depth-counted disable with RAII re-enable.
//! - [`spinlock`]: the lowest-level mutual exclusion primitive. Every
//!   blocking primitive in the kernel is built on top of it.
//! - [`tlb`]: the software model of the MIPS-style TLB: 64 entries,
//!   EntryHi/EntryLo encoding, random-slot replacement, global invalidate.
//! - [`trapframe`]: the saved register file crossing the user/kernel
//!   boundary, and the syscall ABI encoded in it.
//!
//! Bedrock has no opinion about processes, files or scheduling; those live
//! in the `meos` crate.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addressing;
pub mod interrupt;
pub mod kprint;
pub mod ram;
pub mod spinlock;
pub mod tlb;
pub mod trapframe;

pub use addressing::{Kva, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, Pa, Va};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use trapframe::TrapFrame;
