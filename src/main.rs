//! Entry point for the nxld loader.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Map the compressed module files and describe them as a `LoadPlan`.
//! 3. Reserve the arena and prepare the process image (load, stack, detours, registry).
//! 4. Install the trap handler and jump into the runtime.
//!
//! Any failure is logged once and the process is crashed; nothing is retried.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use nxld::arch::Architecture;
use nxld::config::{Config, ModuleArg};
use nxld::detour;
use nxld::inflate::{CompressedModule, Miniz};
use nxld::loader::{LoadPlan, Loader, ModuleSource, SupportLayout};
use nxld::sys;

fn main() {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run(config) {
        tracing::error!("{:#}", err);
        sys::crash();
    }
}

fn map_module(arg: &ModuleArg) -> Result<Mmap> {
    let path: &Path = &arg.path;
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    Ok(mmap)
}

fn run(config: Config) -> Result<()> {
    let runtime_map = map_module(&config.runtime)?;
    let support_map = map_module(&config.support)?;
    let library_maps = config
        .libraries
        .iter()
        .map(|library| map_module(&library.module))
        .collect::<Result<Vec<_>>>()?;

    let plan = LoadPlan {
        runtime: ModuleSource::new(
            "runtime",
            CompressedModule::new(&runtime_map, config.runtime.decompressed_size),
        ),
        support: ModuleSource::new(
            "support",
            CompressedModule::new(&support_map, config.support.decompressed_size),
        ),
        libraries: config
            .libraries
            .iter()
            .zip(&library_maps)
            .map(|(library, map)| {
                ModuleSource::new(
                    library.name.clone(),
                    CompressedModule::new(map, library.module.decompressed_size),
                )
            })
            .collect(),
        support_layout: SupportLayout {
            registry_offset: config.registry_offset,
            detours_offset: config.detours_offset,
            trap_handler_offset: config.trap_handler_offset,
        },
        detours: config.detours.into_iter().map(|arg| arg.0).collect(),
    };

    let arch = config.arch.backend();
    let arena_size = plan.arena_size().context("sizing the arena failed")?;
    tracing::info!("target {}, arena of {:#x} bytes", arch.name(), arena_size);

    let mut loader = Loader::reserve(arch, &plan).context("loader_alloc failed")?;
    let prepared = loader
        .prepare(&plan, &Miniz)
        .context("preparing the process image failed")?;

    unsafe { detour::install_trap_handler(prepared.trap_handler) }
        .context("installing the trap handler failed")?;

    loader.enter(prepared.runtime, &prepared.stack)
}
