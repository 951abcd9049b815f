//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the loader using `clap`.
//! It describes the compressed modules to load, the support module's table offsets
//! and the runtime functions to detour.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use crate::arch::mips::Mips;
use crate::arch::x86::X86;
use crate::arch::Architecture;
use crate::detour::Detour;

/// A loader for compressed, position-independent ELF32 modules.
///
/// Inflates every module into one arena, builds the initial process stack,
/// detours a fixed set of runtime functions and jumps into the runtime.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Runtime module (C library / dynamic linker), loaded first
    #[arg(long, value_name = "PATH:SIZE")]
    pub runtime: ModuleArg,

    /// Runtime-support module holding the registry, patch table and trap handler
    #[arg(long, value_name = "PATH:SIZE")]
    pub support: ModuleArg,

    /// Additional library, registered under NAME (repeatable, kept in order)
    #[arg(long = "library", value_name = "NAME=PATH:SIZE")]
    pub libraries: Vec<LibraryArg>,

    /// Offset of the library registry inside the support module
    #[arg(long, value_parser = parse_number)]
    pub registry_offset: u64,

    /// Offset of the detour patch table inside the support module
    #[arg(long, value_parser = parse_number)]
    pub detours_offset: u64,

    /// Offset of the SIGTRAP handler inside the support module
    #[arg(long, value_parser = parse_number)]
    pub trap_handler_offset: u64,

    /// Runtime function to detour, by offset (repeatable, patched in order)
    #[arg(long = "detour", value_name = "NAME=OFFSET")]
    pub detours: Vec<DetourArg>,

    /// Target architecture backend
    #[arg(long, value_enum, default_value_t = Target::native())]
    pub arch: Target,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    Mips,
    Mipsel,
    X86,
}

impl Target {
    /// The backend matching the host, falling back to `x86`.
    pub fn native() -> Self {
        if cfg!(all(target_arch = "mips", target_endian = "big")) {
            Target::Mips
        } else if cfg!(target_arch = "mips") {
            Target::Mipsel
        } else {
            Target::X86
        }
    }

    pub fn backend(self) -> Box<dyn Architecture> {
        match self {
            Target::Mips => Box::new(Mips::big()),
            Target::Mipsel => Box::new(Mips::little()),
            Target::X86 => Box::new(X86),
        }
    }
}

/// A compressed module file and its declared decompressed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArg {
    pub path: PathBuf,
    pub decompressed_size: usize,
}

impl FromStr for ModuleArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, size) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected PATH:SIZE, got {:?}", s))?;
        if path.is_empty() {
            return Err(format!("missing path in {:?}", s));
        }
        let size = parse_number(size)?;
        let decompressed_size =
            usize::try_from(size).map_err(|_| format!("size {} is too large", size))?;
        Ok(Self {
            path: PathBuf::from(path),
            decompressed_size,
        })
    }
}

/// A named library module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryArg {
    pub name: String,
    pub module: ModuleArg,
}

impl FromStr for LibraryArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, module) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=PATH:SIZE, got {:?}", s))?;
        Ok(Self {
            name: name.to_string(),
            module: module.parse()?,
        })
    }
}

/// A detour target given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetourArg(pub Detour);

impl FromStr for DetourArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, offset) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=OFFSET, got {:?}", s))?;
        Ok(Self(Detour::new(name, parse_number(offset)?)))
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}
