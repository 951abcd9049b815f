//! The loader arena.
//!
//! One reservation holds the synthetic stack and every module's laid-out
//! segments. Space is handed out by bumping a cursor and is never returned; the
//! arena outlives the loader because the runtime it jumps to keeps using it.

use memmap2::MmapMut;
use tracing::debug;

use crate::error::{LoaderError, Result};
use crate::sys;
use crate::utils::align_up;

/// Addressable memory the later pipeline stages write into.
///
/// Addresses are absolute target addresses, not offsets, so the same code
/// works against the live arena and against plain buffers in tests.
pub trait AddressSpace {
    fn bytes(&self, address: u64, len: usize) -> Result<&[u8]>;

    fn bytes_mut(&mut self, address: u64, len: usize) -> Result<&mut [u8]>;

    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.bytes_mut(address, data.len())?.copy_from_slice(data);
        Ok(())
    }
}

pub struct Arena<M = MmapMut> {
    memory: M,
    base_address: u64,
    cursor: usize,
}

impl Arena<MmapMut> {
    /// Maps `total_size` bytes with read, write and execute permission.
    pub fn reserve(total_size: usize) -> Result<Self> {
        let mut memory = sys::map_anonymous_rwx(total_size)?;
        let base_address = memory.as_mut_ptr() as u64;
        debug!("arena: {:#x} bytes at {:#x}", total_size, base_address);
        Ok(Self {
            memory,
            base_address,
            cursor: 0,
        })
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> Arena<M> {
    /// Wraps `memory`, reporting `base_address` as the address of its first byte.
    pub fn with_base_address(memory: M, base_address: u64) -> Self {
        Self {
            memory,
            base_address,
            cursor: 0,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn len(&self) -> usize {
        self.memory.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the next free byte.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cursor_address(&self) -> u64 {
        self.base_address + self.cursor as u64
    }

    /// Advances the cursor by `size` and returns the address it held before.
    pub fn carve(&mut self, size: usize) -> Result<u64> {
        let end = self
            .cursor
            .checked_add(size)
            .filter(|&end| end <= self.len())
            .ok_or(LoaderError::ArenaExhausted {
                cursor: self.cursor,
                wanted: size,
                length: self.len(),
            })?;
        let address = self.cursor_address();
        self.cursor = end;
        Ok(address)
    }

    /// Moves the cursor up to the next `align` boundary; returns the bytes skipped.
    pub fn align_cursor(&mut self, align: u64) -> Result<usize> {
        if align > 1 && !align.is_power_of_two() {
            return Err(LoaderError::Misaligned {
                address: self.cursor_address(),
                align,
            });
        }
        let current = self.cursor_address();
        let lost = (align_up(current, align) - current) as usize;
        self.carve(lost)?;
        Ok(lost)
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let out_of_bounds = LoaderError::OutOfBounds { address, len };
        let start = address
            .checked_sub(self.base_address)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(out_of_bounds)?;
        match start.checked_add(len) {
            Some(end) if end <= self.len() => Ok(start..end),
            _ => Err(LoaderError::OutOfBounds { address, len }),
        }
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> AddressSpace for Arena<M> {
    fn bytes(&self, address: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(address, len)?;
        Ok(&self.memory.as_ref()[range])
    }

    fn bytes_mut(&mut self, address: u64, len: usize) -> Result<&mut [u8]> {
        let range = self.range(address, len)?;
        Ok(&mut self.memory.as_mut()[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1000_0000;

    #[test]
    fn carve_returns_previous_cursor() {
        let mut arena = Arena::with_base_address(vec![0u8; 0x4000], BASE);
        assert_eq!(arena.carve(0x100).unwrap(), BASE);
        assert_eq!(arena.carve(0x200).unwrap(), BASE + 0x100);
        assert_eq!(arena.cursor(), 0x300);
    }

    #[test]
    fn carving_past_the_end_fails_without_moving() {
        let mut arena = Arena::with_base_address(vec![0u8; 0x1000], BASE);
        arena.carve(0x800).unwrap();
        assert!(matches!(
            arena.carve(0x801),
            Err(LoaderError::ArenaExhausted { cursor: 0x800, .. })
        ));
        assert_eq!(arena.cursor(), 0x800);
        assert_eq!(arena.carve(0x800).unwrap(), BASE + 0x800);
    }

    #[test]
    fn alignment_uses_the_reported_address() {
        let mut arena = Arena::with_base_address(vec![0u8; 0x30000], BASE + 0x1000);
        assert_eq!(arena.align_cursor(0x10000).unwrap(), 0xf000);
        assert_eq!(arena.cursor_address(), BASE + 0x10000);
        assert_eq!(arena.align_cursor(0x10000).unwrap(), 0);
        assert_eq!(arena.align_cursor(0).unwrap(), 0);
        assert!(matches!(arena.align_cursor(3), Err(LoaderError::Misaligned { .. })));
    }

    #[test]
    fn accesses_are_bounds_checked() {
        let mut arena = Arena::with_base_address(vec![0u8; 0x100], BASE);
        arena.write(BASE + 0xfc, &[1, 2, 3, 4]).unwrap();
        assert_eq!(arena.bytes(BASE + 0xfc, 4).unwrap(), &[1, 2, 3, 4]);
        assert!(arena.bytes(BASE + 0xfd, 4).is_err());
        assert!(arena.bytes(BASE - 1, 1).is_err());
    }

    #[test]
    fn reserve_maps_the_requested_length() {
        // Kernels that forbid writable+executable mappings cannot host the loader at all.
        if let Ok(arena) = Arena::reserve(0x10000) {
            assert_eq!(arena.len(), 0x10000);
            assert_eq!(arena.base_address() % 0x1000, 0);
        }
    }
}
