//! Segment mapping.
//!
//! This module copies an ELF32 file image into the arena following its program
//! headers. Only `PT_LOAD` entries are honoured; everything else (dynamic, note,
//! GNU stack) is skipped and no relocation happens, so images must be
//! position-independent and self-relative.

use object::elf::{FileHeader32, PT_LOAD};
use object::read::elf::{FileHeader, ProgramHeader};
use object::Endianness;
use tracing::debug;

use crate::arch::Architecture;
use crate::arena::{AddressSpace, Arena};
use crate::error::{LoaderError, Result};
use crate::inflate::FlatImage;
use crate::utils::{align_up, round_up};

/// Where one `PT_LOAD` segment ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedSegment {
    /// Index of the program header.
    pub index: usize,
    /// Absolute destination address (`base + p_vaddr`).
    pub destination: u64,
    /// Bytes copied from the file image.
    pub file_size: u64,
    /// Arena footprint charged for the segment.
    pub memory_size: u64,
    pub align: u64,
}

/// The memory representation of a module: an arena-resident view.
///
/// The arena owns the bytes; a `LoadedModule` lives as long as the process image
/// and is never freed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub base: u64,
    pub total_size: u64,
    /// `e_entry`, relative to `base`.
    pub entry: u64,
    /// `e_phoff`, relative to `base`.
    pub program_headers: u64,
    pub program_header_count: u16,
    pub program_header_size: u16,
    pub segments: Vec<PlacedSegment>,
}

impl LoadedModule {
    pub fn entry_address(&self) -> u64 {
        self.base + self.entry
    }

    pub fn program_headers_address(&self) -> u64 {
        self.base + self.program_headers
    }
}

/// Arena footprint of a segment: `p_memsz` rounded to a page, then to `p_align`,
/// plus one guard page when the segment does not start at the module base.
///
/// The guard page separates the bss of one module from the text of the next.
pub fn segment_footprint(memsz: u64, vaddr: u64, align: u64, page_size: u64) -> u64 {
    let mut size = align_up(memsz, page_size);
    size = round_up(size, align);
    if vaddr != 0 {
        size += page_size;
    }
    size
}

/// Lays out `image` at the arena cursor and copies in every `PT_LOAD` segment.
pub fn place<M, A>(
    arena: &mut Arena<M>,
    image: &FlatImage,
    arch: &A,
    page_size: u64,
) -> Result<LoadedModule>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
    A: Architecture + ?Sized,
{
    let data = image.bytes();
    let header = FileHeader32::<Endianness>::parse(data)
        .map_err(|_| LoaderError::MalformedElf("unreadable ELF32 file header"))?;
    let endian = header
        .endian()
        .map_err(|_| LoaderError::MalformedElf("unknown byte order"))?;
    if endian != arch.endianness() {
        return Err(LoaderError::MalformedElf("byte order does not match the target"));
    }
    let machine = header.e_machine(endian);
    if machine != arch.machine() {
        return Err(LoaderError::WrongMachine {
            arch: arch.name(),
            expected: arch.machine(),
            found: machine,
        });
    }
    let program_headers = header
        .program_headers(endian, data)
        .map_err(|_| LoaderError::MalformedElf("program header table out of bounds"))?;

    let start = arena.cursor_address();
    if start % page_size != 0 {
        return Err(LoaderError::Misaligned {
            address: start,
            align: page_size,
        });
    }

    debug!(
        "ehdr has {} program headers at offset {:#x}",
        program_headers.len(),
        header.e_phoff(endian)
    );

    let mut base = None;
    let mut total_size = 0;
    let mut segments = Vec::new();

    for (index, phdr) in program_headers.iter().enumerate() {
        if phdr.p_type(endian) != PT_LOAD {
            continue;
        }

        let vaddr = u64::from(phdr.p_vaddr(endian));
        let filesz = u64::from(phdr.p_filesz(endian));
        let memsz = u64::from(phdr.p_memsz(endian));
        let align = u64::from(phdr.p_align(endian));

        let base = match base {
            Some(base) => base,
            None => {
                let lost = arena.align_cursor(align)?;
                debug!("lost {} bytes due to segment alignment", lost);
                let start = arena.cursor_address();
                base = Some(start);
                start
            }
        };

        debug!("found a PT_LOAD segment at {}", index);
        let footprint = segment_footprint(memsz, vaddr, align, page_size);
        if filesz > footprint {
            return Err(LoaderError::OversizedSegment {
                index,
                filesz,
                memsz: footprint,
            });
        }

        let source = phdr
            .data(endian, data)
            .map_err(|()| LoaderError::MalformedElf("segment file range out of bounds"))?;

        let footprint_len = usize::try_from(footprint).map_err(|_| LoaderError::ArenaExhausted {
            cursor: arena.cursor(),
            wanted: usize::MAX,
            length: arena.len(),
        })?;
        arena.carve(footprint_len)?;
        total_size += footprint;

        // The whole in-memory extent, bss included, must sit inside what this
        // module has carved so far; the next module starts at the cursor.
        let destination = base + vaddr;
        let end = destination
            .checked_add(memsz.max(filesz))
            .ok_or(LoaderError::AddressOverflow(destination))?;
        let limit = arena.cursor_address();
        if end > limit {
            return Err(LoaderError::SegmentOverrun { index, end, limit });
        }

        debug!(
            "  copy({:#x}, offset {:#x}, {})",
            destination,
            phdr.p_offset(endian),
            filesz
        );
        arena.write(destination, source)?;

        segments.push(PlacedSegment {
            index,
            destination,
            file_size: filesz,
            memory_size: footprint,
            align,
        });
    }

    let base = base.ok_or(LoaderError::NoLoadableSegments)?;
    Ok(LoadedModule {
        base,
        total_size,
        entry: u64::from(header.e_entry(endian)),
        program_headers: u64::from(header.e_phoff(endian)),
        program_header_count: header.e_phnum(endian),
        program_header_size: header.e_phentsize(endian),
        segments,
    })
}
