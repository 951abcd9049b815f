//! Operating system seams.
//!
//! The only kernel services the loader touches: the page-size query, anonymous
//! mappings and the SIGTRAP disposition. Everything else works on plain memory.

use memmap2::{MmapMut, MmapOptions};
use std::io;

use crate::error::{LoaderError, Result};

/// Fallback when `sysconf` cannot answer.
const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Returns the system page size.
pub fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        size as u64
    }
}

/// Maps `size` bytes of private, zero-filled, read/write memory.
pub fn map_anonymous(size: usize) -> Result<MmapMut> {
    MmapOptions::new()
        .len(size)
        .map_anon()
        .map_err(|source| LoaderError::Map { size, source })
}

/// Maps `size` bytes of private memory that is readable, writable and executable.
pub fn map_anonymous_rwx(size: usize) -> Result<MmapMut> {
    let mut map = map_anonymous(size)?;
    let rc = unsafe {
        libc::mprotect(
            map.as_mut_ptr().cast(),
            size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        )
    };
    if rc != 0 {
        return Err(LoaderError::Map {
            size,
            source: io::Error::last_os_error(),
        });
    }
    Ok(map)
}

/// Installs `handler` as the process-wide `SA_SIGINFO` handler for SIGTRAP.
///
/// # Safety
/// `handler` must be the address of a function with the
/// `void (int, siginfo_t *, void *)` signature that stays mapped for the rest
/// of the process lifetime.
pub unsafe fn install_trap_handler(handler: usize) -> Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler;
    action.sa_flags = libc::SA_SIGINFO;
    let rc = unsafe { libc::sigaction(libc::SIGTRAP, &action, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(LoaderError::TrapHandler(io::Error::last_os_error()));
    }
    Ok(())
}

/// Terminates the process immediately, without unwinding or running destructors.
pub fn crash() -> ! {
    std::process::abort()
}
