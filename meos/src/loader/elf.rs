//! ELF32 image loading.
//!
//! Reads an executable out of a [`Vnode`] and populates an address
//! space: one defined region per `PT_LOAD` header, file bytes copied in
//! through the lazy page table, the gap up to `p_memsz` left to the
//! zero-fill that fresh frames get anyway. Returns the entry point.
//!
//! Only what a static MIPS executable needs is understood: 32-bit class,
//! little-endian data, type `ET_EXEC`. Anything else is `ENOEXEC`.

use crate::{Errno, fs::Vnode, mm::AddrSpace};
use alloc::{sync::Arc, vec};
use bedrock::addressing::Va;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_MIPS: u16 = 8;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_exact_at(vn: &Arc<dyn Vnode>, buf: &mut [u8], offset: u64) -> Result<(), Errno> {
    let mut done = 0;
    while done < buf.len() {
        let n = vn.read_at(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            // Truncated image.
            return Err(Errno::NotExecutable);
        }
        done += n;
    }
    Ok(())
}

/// Loads the executable in `vn` into `aspace` and returns its entry
/// point.
///
/// # Errors
/// - [`Errno::NotExecutable`]: bad magic/class/type, malformed or
///   truncated headers.
/// - [`Errno::BadAddress`]: a segment does not fit in user space.
/// - [`Errno::NoMemory`]: out of frames while copying segment bytes.
pub fn load_elf(vn: &Arc<dyn Vnode>, aspace: &mut AddrSpace) -> Result<Va, Errno> {
    let mut ehdr = [0u8; EHDR_SIZE];
    read_exact_at(vn, &mut ehdr, 0)?;

    if ehdr[0..4] != ELF_MAGIC
        || ehdr[4] != ELFCLASS32
        || ehdr[5] != ELFDATA2LSB
        || u16_at(&ehdr, 16) != ET_EXEC
        || u16_at(&ehdr, 18) != EM_MIPS
    {
        return Err(Errno::NotExecutable);
    }

    let entry = u32_at(&ehdr, 24) as usize;
    let phoff = u32_at(&ehdr, 28) as u64;
    let phentsize = u16_at(&ehdr, 42) as usize;
    let phnum = u16_at(&ehdr, 44) as usize;
    if phentsize != PHDR_SIZE || phnum == 0 {
        return Err(Errno::NotExecutable);
    }

    for i in 0..phnum {
        let mut phdr = [0u8; PHDR_SIZE];
        read_exact_at(vn, &mut phdr, phoff + (i * PHDR_SIZE) as u64)?;
        if u32_at(&phdr, 0) != PT_LOAD {
            continue;
        }
        let p_offset = u32_at(&phdr, 4) as u64;
        let p_vaddr = u32_at(&phdr, 8) as usize;
        let p_filesz = u32_at(&phdr, 16) as usize;
        let p_memsz = u32_at(&phdr, 20) as usize;
        let p_flags = u32_at(&phdr, 24);
        if p_filesz > p_memsz {
            return Err(Errno::NotExecutable);
        }
        if p_memsz == 0 {
            continue;
        }

        let vaddr = Va::new(p_vaddr).ok_or(Errno::BadAddress)?;
        aspace.define_region(
            vaddr,
            p_memsz,
            p_flags & 0x4 != 0,
            p_flags & 0x2 != 0,
            p_flags & 0x1 != 0,
        )?;

        // Copy the initialized bytes; the bss tail beyond p_filesz stays
        // zero because fresh frames are zeroed.
        let mut copied = 0;
        let mut chunk = vec![0u8; bedrock::addressing::PAGE_SIZE];
        while copied < p_filesz {
            let n = chunk.len().min(p_filesz - copied);
            read_exact_at(vn, &mut chunk[..n], p_offset + copied as u64)?;
            aspace.copy_out_bytes(vaddr + copied, &chunk[..n])?;
            copied += n;
        }
        log::debug!(
            "load: segment va 0x{:x} filesz 0x{:x} memsz 0x{:x}",
            p_vaddr,
            p_filesz,
            p_memsz
        );
    }

    Va::new(entry).ok_or(Errno::NotExecutable)
}

/// Builds a minimal valid ELF32 image in memory. Boot-time installers
/// and the test suite use this to seed executables into the filesystem.
pub fn build_image(entry: u32, segments: &[(u32, &[u8], u32)]) -> alloc::vec::Vec<u8> {
    let phnum = segments.len();
    let mut image = vec![0u8; EHDR_SIZE + phnum * PHDR_SIZE];
    image[0..4].copy_from_slice(&ELF_MAGIC);
    image[4] = ELFCLASS32;
    image[5] = ELFDATA2LSB;
    image[6] = 1; // EV_CURRENT
    image[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    image[18..20].copy_from_slice(&EM_MIPS.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
    image[24..28].copy_from_slice(&entry.to_le_bytes());
    image[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    image[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    image[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    image[44..46].copy_from_slice(&(phnum as u16).to_le_bytes());

    for (i, (vaddr, bytes, memsz)) in segments.iter().enumerate() {
        let data_off = image.len() as u32;
        let ph = EHDR_SIZE + i * PHDR_SIZE;
        image[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        image[ph + 4..ph + 8].copy_from_slice(&data_off.to_le_bytes());
        image[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
        image[ph + 16..ph + 20].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        image[ph + 20..ph + 24]
            .copy_from_slice(&(*memsz).max(bytes.len() as u32).to_le_bytes());
        image[ph + 24..ph + 28].copy_from_slice(&0x7u32.to_le_bytes()); // rwx
        image.extend_from_slice(bytes);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::OpenFlags, test_support};
    use bedrock::addressing::PAGE_SIZE;

    fn open_image(name: &str, image: &[u8]) -> Arc<dyn Vnode> {
        test_support::boot();
        crate::fs::rootfs().install(name, image);
        crate::fs::open(name, OpenFlags::RDONLY).unwrap()
    }

    #[test]
    fn loads_segments_and_entry() {
        let image = build_image(
            0x0040_0010,
            &[
                (0x0040_0000, b"codecodecode", 0x100),
                (0x1000_0000, b"data", PAGE_SIZE as u32 + 16),
            ],
        );
        let vn = open_image("prog", &image);
        let mut aspace = AddrSpace::new();
        let entry = load_elf(&vn, &mut aspace).unwrap();
        assert_eq!(entry.into_usize(), 0x0040_0010);

        let mut code = [0u8; 12];
        aspace
            .copy_in_bytes(Va::new(0x0040_0000).unwrap(), &mut code)
            .unwrap();
        assert_eq!(&code, b"codecodecode");

        // The bss tail past the file bytes reads as zeros.
        let mut tail = [0xffu8; 8];
        aspace
            .copy_in_bytes(Va::new(0x1000_0004).unwrap(), &mut tail)
            .unwrap();
        assert_eq!(tail, [0u8; 8]);
        // The second segment spans a page boundary worth of entries.
        assert!(
            aspace
                .page_table()
                .get_entry(Va::new(0x1000_1000).unwrap())
                .is_some()
        );
    }

    #[test]
    fn rejects_non_elf() {
        let vn = open_image("not-elf", b"#!/bin/sh\necho hi\n");
        let mut aspace = AddrSpace::new();
        assert_eq!(load_elf(&vn, &mut aspace), Err(Errno::NotExecutable));
    }

    #[test]
    fn rejects_truncated_image() {
        let mut image = build_image(0x0040_0000, &[(0x0040_0000, b"full program", 0)]);
        image.truncate(image.len() - 4);
        let vn = open_image("trunc", &image);
        let mut aspace = AddrSpace::new();
        assert_eq!(load_elf(&vn, &mut aspace), Err(Errno::NotExecutable));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut image = build_image(0x0040_0000, &[(0x0040_0000, b"x", 0)]);
        image[18..20].copy_from_slice(&62u16.to_le_bytes()); // x86-64
        let vn = open_image("wrong-arch", &image);
        let mut aspace = AddrSpace::new();
        assert_eq!(load_elf(&vn, &mut aspace), Err(Errno::NotExecutable));
    }
}
