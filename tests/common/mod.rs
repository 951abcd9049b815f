//! Shared fixtures: a tiny ELF32 image writer and a raw-DEFLATE compressor.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::Compression;
use object::endian::{U16, U32};
use object::pod::bytes_of;
use object::Endianness;
use std::io::Write;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// One program header and the file bytes behind it.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub p_type: u32,
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub memsz: u32,
    pub align: u32,
}

impl SegmentSpec {
    pub fn load(vaddr: u32, data: Vec<u8>, memsz: u32, align: u32) -> Self {
        Self {
            p_type: object::elf::PT_LOAD,
            vaddr,
            data,
            memsz,
            align,
        }
    }

    pub fn other(p_type: u32) -> Self {
        Self {
            p_type,
            vaddr: 0,
            data: Vec::new(),
            memsz: 0,
            align: 4,
        }
    }
}

/// Builds a position-independent ELF32 image (`ET_DYN`).
pub struct ElfBuilder {
    endian: Endianness,
    machine: u16,
    entry: u32,
    segments: Vec<SegmentSpec>,
}

impl ElfBuilder {
    pub fn new(endian: Endianness, machine: u16) -> Self {
        Self {
            endian,
            machine,
            entry: 0,
            segments: Vec::new(),
        }
    }

    /// A little-endian i386 image.
    pub fn x86() -> Self {
        Self::new(Endianness::Little, object::elf::EM_386)
    }

    pub fn entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    pub fn segment(mut self, segment: SegmentSpec) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let e = self.endian;
        let u16 = |v: u16| U16::new(e, v);
        let u32 = |v: u32| U32::new(e, v);

        let phoff = EHDR_SIZE;
        let mut offset = phoff + PHDR_SIZE * self.segments.len();
        let mut offsets = Vec::new();
        for segment in &self.segments {
            offset = (offset + 15) & !15;
            offsets.push(offset);
            offset += segment.data.len();
        }

        let mut buffer = Vec::new();
        let file_header = object::elf::FileHeader32::<Endianness> {
            e_ident: object::elf::Ident {
                magic: object::elf::ELFMAG,
                class: object::elf::ELFCLASS32,
                data: if e == Endianness::Little {
                    object::elf::ELFDATA2LSB
                } else {
                    object::elf::ELFDATA2MSB
                },
                version: object::elf::EV_CURRENT,
                os_abi: object::elf::ELFOSABI_SYSV,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: u16(object::elf::ET_DYN),
            e_machine: u16(self.machine),
            e_version: u32(object::elf::EV_CURRENT as u32),
            e_entry: u32(self.entry),
            e_phoff: u32(phoff as u32),
            e_shoff: u32(0),
            e_flags: u32(0),
            e_ehsize: u16(EHDR_SIZE as u16),
            e_phentsize: u16(PHDR_SIZE as u16),
            e_phnum: u16(self.segments.len() as u16),
            e_shentsize: u16(40),
            e_shnum: u16(0),
            e_shstrndx: u16(0),
        };
        buffer.extend_from_slice(bytes_of(&file_header));

        for (segment, &file_offset) in self.segments.iter().zip(&offsets) {
            let prog_header = object::elf::ProgramHeader32::<Endianness> {
                p_type: u32(segment.p_type),
                p_offset: u32(file_offset as u32),
                p_vaddr: u32(segment.vaddr),
                p_paddr: u32(segment.vaddr),
                p_filesz: u32(segment.data.len() as u32),
                p_memsz: u32(segment.memsz),
                p_flags: u32(object::elf::PF_R | object::elf::PF_W | object::elf::PF_X),
                p_align: u32(segment.align),
            };
            buffer.extend_from_slice(bytes_of(&prog_header));
        }

        for (segment, &file_offset) in self.segments.iter().zip(&offsets) {
            buffer.resize(file_offset, 0);
            buffer.extend_from_slice(&segment.data);
        }
        buffer
    }
}

/// Raw DEFLATE, no zlib header.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Recognisable file contents: byte `i` is `seed + i`.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
