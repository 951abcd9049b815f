//! Decompression-scoped bump allocator.
//!
//! A `DecompressionPool` backs exactly one inflate call. Allocations are carved
//! from a private anonymous mapping in 16-byte steps; only the most recent one
//! can be handed back. Dropping the pool unmaps everything at once.

use memmap2::MmapMut;
use std::ptr::NonNull;
use tracing::{debug, trace};

use crate::error::{LoaderError, Result};
use crate::sys;
use crate::utils::align_up;

/// Allocation granularity in bytes.
pub const GRANULARITY: usize = 16;

/// Smallest pool handed out regardless of the hint. A 15-bit inflate window
/// needs 32 KiB; some images need sixteen times that.
pub const MIN_POOL_SIZE: usize = 32 * 16 * 1024;

const HINT_ROUNDING: u64 = 4096;

pub struct DecompressionPool {
    map: MmapMut,
    cursor: usize,
    last_allocation: Option<usize>,
}

impl DecompressionPool {
    /// Reserves a pool sized from `hint`, never smaller than [`MIN_POOL_SIZE`].
    pub fn new(hint: usize) -> Result<Self> {
        let requested = if hint < MIN_POOL_SIZE {
            MIN_POOL_SIZE
        } else {
            align_up(hint as u64, HINT_ROUNDING) as usize
        };
        debug!("decompression pool: requesting {} bytes", requested);

        Ok(Self {
            map: sys::map_anonymous(requested)?,
            cursor: 0,
            last_allocation: None,
        })
    }

    /// Returns `count * size` bytes rounded up to [`GRANULARITY`].
    pub fn allocate(&mut self, count: usize, size: usize) -> Result<NonNull<u8>> {
        let remaining = self.remaining();
        let wanted = count
            .checked_mul(size)
            .and_then(|n| n.checked_add(GRANULARITY - 1))
            .map(|n| n & !(GRANULARITY - 1))
            .ok_or(LoaderError::PoolExhausted { wanted: usize::MAX, remaining })?;

        if wanted > remaining {
            return Err(LoaderError::PoolExhausted { wanted, remaining });
        }

        let offset = self.cursor;
        let ptr = NonNull::new(self.map.as_mut_ptr().wrapping_add(offset))
            .ok_or(LoaderError::PoolExhausted { wanted, remaining })?;
        self.cursor += wanted;
        self.last_allocation = Some(offset);
        Ok(ptr)
    }

    /// Reclaims `region` only when it is the most recent allocation.
    pub fn free(&mut self, region: *mut u8) {
        let Some(last) = self.last_allocation else {
            return;
        };
        if region.is_null() || region != self.map.as_mut_ptr().wrapping_add(last) {
            return;
        }
        trace!("decompression pool: reclaimed {} bytes", self.cursor - last);
        self.cursor = last;
        self.last_allocation = None;
    }

    /// Total bytes reserved.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.map.len() - self.cursor
    }
}
