//! Architecture abstraction.
//!
//! This module defines the `Architecture` trait, which encapsulates everything the
//! loader needs to know about its target: how target words are encoded, which
//! opcode raises SIGTRAP, and how control is finally handed to the runtime.
//! Segment placement and stack construction stay architecture-neutral.

use object::{Endian, Endianness};
use std::convert::Infallible;

use crate::error::{LoaderError, Result};

pub mod mips;
pub mod x86;

/// Size in bytes of a target word (all supported targets are ELF32).
pub const WORD_SIZE: usize = 4;

/// A trait representing a 32-bit target (e.g. MIPS, i386).
pub trait Architecture {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// The object crate's endianness for this architecture.
    fn endianness(&self) -> Endianness;

    /// The `e_machine` value images for this target carry.
    fn machine(&self) -> u16;

    /// Bytes written over a detoured function's entry. Executing them raises SIGTRAP.
    fn trap_instruction(&self) -> Vec<u8>;

    /// Switches to `stack_pointer` and jumps to `entry` without pushing a return address.
    ///
    /// Only returns when the backend cannot execute on this host.
    ///
    /// # Safety
    /// `entry` must be executable code expecting the initial process stack found at
    /// `stack_pointer`. The current stack is abandoned.
    unsafe fn enter(&self, entry: u64, stack_pointer: u64) -> Result<Infallible>;

    /// Encodes `value` as a target word.
    fn word(&self, value: u64) -> Result<[u8; WORD_SIZE]> {
        let value = u32::try_from(value).map_err(|_| LoaderError::AddressOverflow(value))?;
        Ok(self.endianness().write_u32_bytes(value))
    }

    /// Decodes a target word.
    fn read_word(&self, bytes: [u8; WORD_SIZE]) -> u32 {
        self.endianness().read_u32_bytes(bytes)
    }
}

impl Architecture for Box<dyn Architecture> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn endianness(&self) -> Endianness {
        (**self).endianness()
    }

    fn machine(&self) -> u16 {
        (**self).machine()
    }

    fn trap_instruction(&self) -> Vec<u8> {
        (**self).trap_instruction()
    }

    unsafe fn enter(&self, entry: u64, stack_pointer: u64) -> Result<Infallible> {
        unsafe { (**self).enter(entry, stack_pointer) }
    }
}
