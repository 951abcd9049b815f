//! Blob decompression.
//!
//! Turns a compressed module embedded in (or handed to) the loader into a flat
//! ELF file image. The stream is inflated in one shot into a fresh anonymous
//! mapping; partial output never escapes this module.

use memmap2::MmapMut;
use miniz_oxide::inflate::core::{decompress as inflate_raw, inflate_flags, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;
use std::mem::{align_of, size_of};
use tracing::{debug, info};

use crate::error::{LoaderError, Result};
use crate::sys;
use crate::utils::align_up;
use crate::zalloc::DecompressionPool;

/// A borrowed, read-only view of one compressed module.
#[derive(Debug, Clone, Copy)]
pub struct CompressedModule<'a> {
    data: &'a [u8],
    decompressed_size: usize,
}

impl<'a> CompressedModule<'a> {
    pub fn new(data: &'a [u8], decompressed_size: usize) -> Self {
        Self { data, decompressed_size }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }

    pub fn decompressed_size(&self) -> usize {
        self.decompressed_size
    }
}

/// The file representation of a module: the decompressed ELF bytes.
///
/// Owned by the caller until the segment mapper has consumed it, then dropped,
/// which unmaps the buffer.
pub struct FlatImage {
    data: MmapMut,
    logical_length: usize,
}

impl FlatImage {
    /// Copies `bytes` into a fresh page-aligned mapping.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(&object::elf::ELFMAG) {
            return Err(LoaderError::NotElf);
        }
        let mut data = sys::map_anonymous(align_up(bytes.len() as u64, sys::page_size()) as usize)?;
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            data,
            logical_length: bytes.len(),
        })
    }

    /// The decompressed bytes, `logical_length` long.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.logical_length]
    }

    pub fn logical_length(&self) -> usize {
        self.logical_length
    }

    /// Size of the backing mapping (page-rounded).
    pub fn reserved_length(&self) -> usize {
        self.data.len()
    }
}

/// How an inflate run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InflateStatus {
    StreamEnd,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflateOutcome {
    pub status: InflateStatus,
    pub written: usize,
}

/// A streaming raw-DEFLATE implementation whose only memory source is the pool.
pub trait Inflater {
    /// Runs `input` to completion into `output` in a single call.
    fn inflate(
        &self,
        pool: &mut DecompressionPool,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<InflateOutcome>;
}

/// `miniz_oxide` backend. Its decompressor state is carved from the pool and the
/// output buffer doubles as the history window.
pub struct Miniz;

impl Inflater for Miniz {
    fn inflate(
        &self,
        pool: &mut DecompressionPool,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<InflateOutcome> {
        let state = pool
            .allocate(1, size_of::<DecompressorOxide>())?
            .cast::<DecompressorOxide>();
        let address = state.as_ptr() as u64;
        if address % align_of::<DecompressorOxide>() as u64 != 0 {
            return Err(LoaderError::Misaligned {
                address,
                align: align_of::<DecompressorOxide>() as u64,
            });
        }

        let (status, consumed, written) = unsafe {
            state.as_ptr().write(DecompressorOxide::new());
            let result = inflate_raw(
                &mut *state.as_ptr(),
                input,
                output,
                0,
                inflate_flags::TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF,
            );
            std::ptr::drop_in_place(state.as_ptr());
            result
        };
        pool.free(state.as_ptr().cast());
        debug!("inflate consumed {} of {} input bytes", consumed, input.len());

        let status = match status {
            TINFLStatus::Done => InflateStatus::StreamEnd,
            other => InflateStatus::Failed(format!("{:?}", other)),
        };
        Ok(InflateOutcome { status, written })
    }
}

/// Inflates `module` into a validated [`FlatImage`].
///
/// The scoped pool is sized from an eighth of the declared output and released
/// before returning, whatever the outcome.
pub fn decompress(module: &CompressedModule<'_>, inflater: &impl Inflater) -> Result<FlatImage> {
    let mut pool = DecompressionPool::new(module.decompressed_size() / 8)?;
    let reserved = align_up(module.decompressed_size() as u64, sys::page_size()) as usize;
    let mut data = sys::map_anonymous(reserved)?;

    info!("inflating ..");
    let outcome = inflater.inflate(&mut pool, module.data(), &mut data)?;
    debug!(
        "allocated {} bytes, used {}, remainder = {}",
        pool.len(),
        pool.used(),
        pool.remaining()
    );
    debug!("output_size is {}, wrote {}", reserved, outcome.written);
    drop(pool);

    if let InflateStatus::Failed(status) = outcome.status {
        return Err(LoaderError::Inflate { status });
    }
    if !data.starts_with(&object::elf::ELFMAG) {
        return Err(LoaderError::NotElf);
    }

    Ok(FlatImage {
        data,
        logical_length: module.decompressed_size(),
    })
}
