//! Minimal Reflective Loader Library.
//!
//! This library provides the core components for the `nxld` loader, which turns a
//! set of compressed ELF32 modules into a running process image without an
//! operating-system dynamic linker.
//! It is organized into several modules:
//! - `config`: CLI configuration.
//! - `arch`: Architecture-specific backends (word encoding, trap opcode, entry jump).
//! - `zalloc`: The decompression-scoped bump allocator.
//! - `inflate`: Blob decompression into flat ELF images.
//! - `arena`: The bump-allocated memory arena every module is placed in.
//! - `mapper`: `PT_LOAD` segment placement.
//! - `stack`: The synthetic initial stack and auxiliary vector.
//! - `detour`: Entry-point patching and the patch table.
//! - `registry`: The library registry written into the support module.
//! - `loader`: The pipeline orchestration and final control transfer.
#![cfg_attr(target_arch = "mips", feature(asm_experimental_arch))]

pub mod arch;
pub mod arena;
pub mod config;
pub mod detour;
pub mod error;
pub mod inflate;
pub mod loader;
pub mod mapper;
pub mod registry;
pub mod stack;
pub mod sys;
pub mod utils;
pub mod zalloc;
