//! i386 backend (ELF32, little endian).

use super::Architecture;
use crate::error::{LoaderError, Result};
use object::Endianness;
use std::convert::Infallible;

const INT3: u8 = 0xcc;

/// The i386 backend.
pub struct X86;

impl Architecture for X86 {
    fn name(&self) -> &'static str {
        "x86"
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn machine(&self) -> u16 {
        object::elf::EM_386
    }

    fn trap_instruction(&self) -> Vec<u8> {
        vec![INT3]
    }

    #[cfg(target_arch = "x86")]
    unsafe fn enter(&self, entry: u64, stack_pointer: u64) -> Result<Infallible> {
        unsafe {
            core::arch::asm!(
                "mov esp, {sp}",
                "jmp {entry}",
                sp = in(reg) stack_pointer as usize,
                entry = in(reg) entry as usize,
                options(noreturn),
            )
        }
    }

    #[cfg(not(target_arch = "x86"))]
    unsafe fn enter(&self, _entry: u64, _stack_pointer: u64) -> Result<Infallible> {
        Err(LoaderError::Unsupported("x86 entry on a non-x86 host"))
    }
}
