//! MIPS32 backend (o32, either byte order).

use super::Architecture;
use crate::error::{LoaderError, Result};
use object::{Endian, Endianness};
use std::convert::Infallible;

/// `break 0`
const BREAK: u32 = 0x0000_000d;

/// The MIPS32 backend.
pub struct Mips {
    endian: Endianness,
}

impl Mips {
    pub fn big() -> Self {
        Self { endian: Endianness::Big }
    }

    pub fn little() -> Self {
        Self { endian: Endianness::Little }
    }
}

impl Architecture for Mips {
    fn name(&self) -> &'static str {
        match self.endian {
            Endianness::Big => "mips",
            Endianness::Little => "mipsel",
        }
    }

    fn endianness(&self) -> Endianness {
        self.endian
    }

    fn machine(&self) -> u16 {
        object::elf::EM_MIPS
    }

    fn trap_instruction(&self) -> Vec<u8> {
        self.endian.write_u32_bytes(BREAK).to_vec()
    }

    #[cfg(target_arch = "mips")]
    unsafe fn enter(&self, entry: u64, stack_pointer: u64) -> Result<Infallible> {
        // PIC entry code recomputes $gp from $t9, so the target goes through $25.
        unsafe {
            core::arch::asm!(
                "move $sp, {sp}",
                "jr $25",
                "nop",
                sp = in(reg) stack_pointer as usize,
                in("$25") entry as usize,
                options(noreturn),
            )
        }
    }

    #[cfg(not(target_arch = "mips"))]
    unsafe fn enter(&self, _entry: u64, _stack_pointer: u64) -> Result<Infallible> {
        Err(LoaderError::Unsupported("mips entry on a non-mips host"))
    }
}
