//! Program loading.
//!
//! [`elf`] reads an ELF32 executable out of a vnode and populates an
//! address space's segments; [`stack_builder`] lays out data on a new
//! user stack. `execv` composes the two: load the image, define the
//! stack, marshal `argv` onto it.

pub mod elf;
pub mod stack_builder;

pub use elf::load_elf;
pub use stack_builder::StackBuilder;

use crate::{Errno, mm::AddrSpace};
use alloc::string::String;
use bedrock::addressing::Va;

/// The user-visible result of argv marshaling.
#[derive(Clone, Copy, Debug)]
pub struct ArgvLayout {
    /// Number of arguments.
    pub argc: usize,
    /// User address of the argv pointer array.
    pub argv: Va,
    /// The stack pointer after marshaling, 8-byte aligned.
    pub sp: Va,
}

/// Marshals `args` onto the stack of `aspace`, which starts (empty,
/// descending) at `sp`.
///
/// Layout, high to low: the `(argc + 1)`-slot pointer array, then the
/// string bytes (each NUL-terminated), then the aligned final stack
/// pointer. The array's last slot is a null pointer.
pub fn build_argv(
    aspace: &AddrSpace,
    sp: Va,
    args: &[String],
) -> Result<ArgvLayout, Errno> {
    let mut sb = StackBuilder::new(aspace, sp);
    let argc = args.len();
    let argv = sb.reserve(4 * (argc + 1));
    let mut pointers = alloc::vec::Vec::with_capacity(argc + 1);
    for arg in args {
        pointers.push(sb.push_str(arg)?.into_usize() as u32);
    }
    pointers.push(0);
    for (i, p) in pointers.iter().enumerate() {
        sb.write_u32_at(argv + 4 * i, *p)?;
    }
    sb.align(8);
    Ok(ArgvLayout {
        argc,
        argv,
        sp: sb.sp(),
    })
}
