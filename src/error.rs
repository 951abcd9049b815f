//! Loader error type.
//!
//! Every variant is fatal. The library reports the condition and the binary
//! terminates the process; nothing in the pipeline retries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("anonymous mapping of {size:#x} bytes failed: {source}")]
    Map {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("requested a {wanted} byte allocation, only {remaining} bytes remaining")]
    PoolExhausted { wanted: usize, remaining: usize },

    #[error("decompression failed with status {status}")]
    Inflate { status: String },

    #[error("decompressed a non-elf file")]
    NotElf,

    #[error("malformed elf image: {0}")]
    MalformedElf(&'static str),

    #[error("elf machine {found} does not match the {arch} backend ({expected})")]
    WrongMachine { arch: &'static str, expected: u16, found: u16 },

    #[error("elf image has no PT_LOAD segments")]
    NoLoadableSegments,

    #[error("segment {index} file size {filesz:#x} exceeds its memory size {memsz:#x}")]
    OversizedSegment { index: usize, filesz: u64, memsz: u64 },

    #[error("segment {index} ends at {end:#x}, past its module's region ending at {limit:#x}")]
    SegmentOverrun { index: usize, end: u64, limit: u64 },

    #[error("address {address:#x} is not aligned to {align:#x}")]
    Misaligned { address: u64, align: u64 },

    #[error("arena exhausted: cursor {cursor:#x} + {wanted:#x} exceeds length {length:#x}")]
    ArenaExhausted { cursor: usize, wanted: usize, length: usize },

    #[error("arena size overflows: modules, stack and padding exceed the address space")]
    ArenaSizeOverflow,

    #[error("module {0} was not loaded by this loader")]
    UnknownModule(usize),

    #[error("access of {len:#x} bytes at {address:#x} is outside the address space")]
    OutOfBounds { address: u64, len: usize },

    #[error("library name {name:?} is {len} bytes, at most {max} allowed")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("library registry is full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("address {0:#x} does not fit in a 32-bit target word")]
    AddressOverflow(u64),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("installing the trap handler failed: {0}")]
    TrapHandler(#[source] std::io::Error),
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
