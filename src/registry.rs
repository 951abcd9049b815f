//! Library registry.
//!
//! The support module carries a fixed table of
//! `{ name[32], first_base, second_base }` records. The loader fills one record
//! per extra library, in load order, so the next stage can find them by name.
//! The loader never reads the table back.

use std::fmt;

use crate::arch::{Architecture, WORD_SIZE};
use crate::arena::AddressSpace;
use crate::error::{LoaderError, Result};

/// Bytes reserved for a name, including the terminating NUL.
pub const NAME_CAPACITY: usize = 32;

/// Longest accepted name.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

/// Size of one serialised record.
pub const ENTRY_SIZE: usize = NAME_CAPACITY + 2 * WORD_SIZE;

/// A NUL-padded name of at most [`MAX_NAME_LEN`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct LibraryName {
    bytes: [u8; NAME_CAPACITY],
    len: usize,
}

impl LibraryName {
    pub fn as_str(&self) -> &str {
        // Only ever built from a `&str`.
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    /// The full fixed-size field, NUL padded.
    pub fn as_field(&self) -> &[u8; NAME_CAPACITY] {
        &self.bytes
    }
}

impl TryFrom<&str> for LibraryName {
    type Error = LoaderError;

    fn try_from(name: &str) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(LoaderError::NameTooLong {
                name: name.to_string(),
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        let mut bytes = [0u8; NAME_CAPACITY];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            bytes,
            len: name.len(),
        })
    }
}

impl fmt::Display for LibraryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for LibraryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Handle on the registry table, threaded through every registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    base_address: u64,
    next_index: usize,
    capacity: usize,
}

impl Registry {
    pub fn new(base_address: u64, capacity: usize) -> Self {
        Self {
            base_address,
            next_index: 0,
            capacity,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn len(&self) -> usize {
        self.next_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of record `index`.
    pub fn entry_address(&self, index: usize) -> u64 {
        self.base_address + (index * ENTRY_SIZE) as u64
    }

    /// Appends `{ name, module_base, 0 }` and returns the record's address.
    pub fn register<S, A>(
        &mut self,
        space: &mut S,
        arch: &A,
        name: &LibraryName,
        module_base: u64,
    ) -> Result<u64>
    where
        S: AddressSpace + ?Sized,
        A: Architecture + ?Sized,
    {
        if self.next_index >= self.capacity {
            return Err(LoaderError::RegistryFull {
                capacity: self.capacity,
            });
        }

        let mut record = [0u8; ENTRY_SIZE];
        record[..NAME_CAPACITY].copy_from_slice(name.as_field());
        record[NAME_CAPACITY..NAME_CAPACITY + WORD_SIZE].copy_from_slice(&arch.word(module_base)?);

        let address = self.entry_address(self.next_index);
        space.write(address, &record)?;
        tracing::debug!("registered {} at {:#x} -> {:#x}", name, address, module_base);
        self.next_index += 1;
        Ok(address)
    }
}
