//! Synthetic initial stack.
//!
//! Builds the image a kernel would leave for a freshly exec'd dynamic linker:
//!
//! ```text
//! sp -> | argc = 1            |
//!       | argv[0]  ---------+ |
//!       | NULL              | |
//!       | envp[0]  -------+ | |
//!       | NULL            | | |
//!       | auxv pairs ...  | | |
//!       | AT_NULL, 0      | | |
//!       | random[16]      | | |
//!       | 0, 0            | | |
//!       | "argv0\0"  <----|-+ |
//!       | "LD_LIBRARY_PATH=/nx\0"
//! ```
//!
//! Every slot is a target word. The runtime's startup code depends on this exact
//! layout.

use tracing::debug;

use crate::arch::{Architecture, WORD_SIZE};
use crate::arena::AddressSpace;
use crate::error::{LoaderError, Result};
use crate::mapper::LoadedModule;

/// Size of the stack region reserved at the bottom of the arena.
pub const STACK_SIZE: usize = 1024 * 1024;

/// Distance between the top of the stack region and the initial stack pointer.
pub const STACK_TOP_MARGIN: u64 = 4096;

pub const ARGV0: &str = "argv0";
pub const ENVIRONMENT: &str = "LD_LIBRARY_PATH=/nx";

pub const AT_NULL: u32 = 0;
pub const AT_PHDR: u32 = 3;
pub const AT_PHENT: u32 = 4;
pub const AT_PHNUM: u32 = 5;
pub const AT_PAGESZ: u32 = 6;
pub const AT_BASE: u32 = 7;
pub const AT_ENTRY: u32 = 9;
pub const AT_UID: u32 = 11;
pub const AT_EUID: u32 = 12;
pub const AT_GID: u32 = 13;
pub const AT_EGID: u32 = 14;
pub const AT_SECURE: u32 = 23;
pub const AT_RANDOM: u32 = 25;

/// The sixteen bytes `AT_RANDOM` points at.
const RANDOM_WORDS: [u64; 4] = [0xabad_1dea, 0xdefa_c8ed, 0xcafe_d00d, 0x00c0_ffee];

/// The argv0 slot is followed by a fixed 6-byte step to the environment string.
const ARGV0_STRIDE: u64 = 6;

/// A key/value pair of the auxiliary vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxEntry {
    pub key: u32,
    pub value: u64,
}

/// Where the pieces of the built stack ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackImage {
    pub stack_pointer: u64,
    pub auxv: Vec<AuxEntry>,
    pub random: u64,
    pub argv0: u64,
    pub envp0: u64,
    /// Bytes written starting at `stack_pointer`.
    pub len: usize,
}

/// Writes the initial stack into the region `[region_start, region_start + region_len)`.
///
/// `runtime` is the module control will be transferred to (reported as `AT_BASE`);
/// `target` is the program it runs on behalf of (`AT_PHDR`, `AT_ENTRY`, ...).
pub fn build<S, A>(
    space: &mut S,
    arch: &A,
    region_start: u64,
    region_len: u64,
    runtime: &LoadedModule,
    target: &LoadedModule,
    page_size: u64,
) -> Result<StackImage>
where
    S: AddressSpace + ?Sized,
    A: Architecture + ?Sized,
{
    let stack_pointer = (region_start + region_len)
        .checked_sub(STACK_TOP_MARGIN)
        .filter(|&sp| sp >= region_start)
        .ok_or(LoaderError::OutOfBounds {
            address: region_start,
            len: region_len as usize,
        })?;
    debug!("setup_stack: sp = {:#x}", stack_pointer);

    let word = WORD_SIZE as u64;
    let mut words: Vec<u64> = vec![
        1, // argc
        0, // argv[0]
        0,
        0, // envp[0]
        0,
    ];
    const ARGV_SLOT: usize = 1;
    const ENVP_SLOT: usize = 3;

    let mut auxv = vec![
        AuxEntry { key: AT_UID, value: 0 },
        AuxEntry { key: AT_EUID, value: 0 },
        AuxEntry { key: AT_GID, value: 0 },
        AuxEntry { key: AT_EGID, value: 0 },
        AuxEntry { key: AT_SECURE, value: 0 },
        AuxEntry { key: AT_PAGESZ, value: page_size },
        AuxEntry { key: AT_BASE, value: runtime.base },
        AuxEntry { key: AT_PHDR, value: target.program_headers_address() },
        AuxEntry { key: AT_PHNUM, value: u64::from(target.program_header_count) },
        AuxEntry { key: AT_PHENT, value: u64::from(target.program_header_size) },
        AuxEntry { key: AT_RANDOM, value: 0 },
        AuxEntry { key: AT_ENTRY, value: target.entry_address() },
        AuxEntry { key: AT_NULL, value: 0 },
    ];

    let random_index = words.len() + auxv.len() * 2;
    let random = stack_pointer + random_index as u64 * word;
    for entry in auxv.iter_mut().filter(|entry| entry.key == AT_RANDOM) {
        entry.value = random;
    }

    for entry in &auxv {
        words.push(u64::from(entry.key));
        words.push(entry.value);
    }
    words.extend_from_slice(&RANDOM_WORDS);
    words.extend_from_slice(&[0, 0]);

    let argv0 = stack_pointer + words.len() as u64 * word;
    let envp0 = argv0 + ARGV0_STRIDE;
    words[ARGV_SLOT] = argv0;
    words[ENVP_SLOT] = envp0;

    let mut image = Vec::with_capacity(words.len() * WORD_SIZE + 32);
    for value in &words {
        image.extend_from_slice(&arch.word(*value)?);
    }
    image.extend_from_slice(ARGV0.as_bytes());
    image.push(0);
    image.resize((envp0 - stack_pointer) as usize, 0);
    image.extend_from_slice(ENVIRONMENT.as_bytes());
    image.push(0);

    if image.len() as u64 > STACK_TOP_MARGIN.min(region_len) {
        return Err(LoaderError::OutOfBounds {
            address: stack_pointer,
            len: image.len(),
        });
    }
    space.write(stack_pointer, &image)?;

    Ok(StackImage {
        stack_pointer,
        auxv,
        random,
        argv0,
        envp0,
        len: image.len(),
    })
}
