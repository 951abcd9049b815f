//! Loader orchestration.
//!
//! This module contains the `Loader` struct which drives the whole pipeline:
//! 1. Reservation: one arena sized for every module, the stack and a padding margin.
//! 2. Loading: inflate each module and map its segments, runtime first.
//! 3. Stack: build the initial process stack for the runtime.
//! 4. Detours: trap selected runtime functions and publish the patch table.
//! 5. Registry: record every extra library inside the support module.
//! 6. Transfer: jump into the runtime, never to return.

use memmap2::MmapMut;
use std::convert::Infallible;
use tracing::{error, info};

use crate::arch::Architecture;
use crate::arena::Arena;
use crate::detour::{self, Detour, PatchRecord};
use crate::error::{LoaderError, Result};
use crate::inflate::{self, CompressedModule, Inflater};
use crate::mapper::{self, LoadedModule};
use crate::registry::{LibraryName, Registry};
use crate::stack::{self, StackImage, STACK_SIZE};
use crate::sys;

/// Spare arena pages absorbing alignment loss; 64 KiB `p_align` values waste a lot.
pub const PADDING: usize = 256 * 4096;

/// A compressed module and the name it is loaded (and registered) under.
#[derive(Debug, Clone)]
pub struct ModuleSource<'a> {
    pub name: String,
    pub compressed: CompressedModule<'a>,
}

impl<'a> ModuleSource<'a> {
    pub fn new(name: impl Into<String>, compressed: CompressedModule<'a>) -> Self {
        Self {
            name: name.into(),
            compressed,
        }
    }
}

/// Byte offsets of the tables the support module exposes to the loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupportLayout {
    pub registry_offset: u64,
    pub detours_offset: u64,
    pub trap_handler_offset: u64,
}

/// Everything one loader run consumes.
#[derive(Debug, Clone)]
pub struct LoadPlan<'a> {
    /// The C runtime / dynamic linker. Control is transferred here.
    pub runtime: ModuleSource<'a>,
    /// The runtime-support module: owner of the registry, patch table and trap handler.
    pub support: ModuleSource<'a>,
    /// Further libraries, registered by name in this order.
    pub libraries: Vec<ModuleSource<'a>>,
    pub support_layout: SupportLayout,
    /// Runtime functions to detour, in patch order.
    pub detours: Vec<Detour>,
}

impl<'a> LoadPlan<'a> {
    /// Arena bytes needed: every decompressed module, the stack and the padding margin.
    pub fn arena_size(&self) -> Result<usize> {
        self.modules()
            .map(|source| source.compressed.decompressed_size())
            .try_fold(STACK_SIZE + PADDING, usize::checked_add)
            .ok_or(LoaderError::ArenaSizeOverflow)
    }

    /// Modules in load order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleSource<'a>> {
        std::iter::once(&self.runtime)
            .chain(std::iter::once(&self.support))
            .chain(self.libraries.iter())
    }
}

/// Index of a module in the loader's module list. Only handed out by [`Loader::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(usize);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0
    }
}

fn lookup(modules: &[(String, LoadedModule)], id: ModuleId) -> Result<&(String, LoadedModule)> {
    modules.get(id.0).ok_or(LoaderError::UnknownModule(id.0))
}

/// What a full preparation pass produced.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub runtime: ModuleId,
    pub support: ModuleId,
    pub libraries: Vec<ModuleId>,
    pub stack: StackImage,
    pub detours: PatchRecord,
    pub registry: Registry,
    /// Absolute address of the support module's SIGTRAP handler.
    pub trap_handler: u64,
}

pub struct Loader<A: Architecture, M = MmapMut> {
    arch: A,
    arena: Arena<M>,
    page_size: u64,
    stack_region: u64,
    modules: Vec<(String, LoadedModule)>,
}

impl<A: Architecture> Loader<A, MmapMut> {
    /// Reserves the live arena for `plan`.
    pub fn reserve(arch: A, plan: &LoadPlan<'_>) -> Result<Self> {
        let arena = Arena::reserve(plan.arena_size()?)?;
        Self::with_arena(arch, arena, sys::page_size())
    }
}

impl<A: Architecture, M: AsRef<[u8]> + AsMut<[u8]>> Loader<A, M> {
    /// Uses `arena` as is; its first [`STACK_SIZE`] bytes become the stack region.
    pub fn with_arena(arch: A, mut arena: Arena<M>, page_size: u64) -> Result<Self> {
        let stack_region = arena.carve(STACK_SIZE)?;
        Ok(Self {
            arch,
            arena,
            page_size,
            stack_region,
            modules: Vec::new(),
        })
    }

    pub fn arena(&self) -> &Arena<M> {
        &self.arena
    }

    pub fn stack_region(&self) -> u64 {
        self.stack_region
    }

    pub fn module(&self, id: ModuleId) -> Option<&LoadedModule> {
        self.modules.get(id.0).map(|(_, module)| module)
    }

    pub fn module_name(&self, id: ModuleId) -> Option<&str> {
        self.modules.get(id.0).map(|(name, _)| name.as_str())
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &str, &LoadedModule)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(index, (name, module))| (ModuleId(index), name.as_str(), module))
    }

    /// Inflates `source` and maps it at the arena cursor. The flat image is
    /// released as soon as its segments are copied.
    pub fn load(&mut self, source: &ModuleSource<'_>, inflater: &impl Inflater) -> Result<ModuleId> {
        info!(
            "loading {} ({} bytes compressed, {} inflated)",
            source.name,
            source.compressed.compressed_size(),
            source.compressed.decompressed_size()
        );
        let flat = inflate::decompress(&source.compressed, inflater)?;
        let module = mapper::place(&mut self.arena, &flat, &self.arch, self.page_size)?;
        drop(flat);

        info!(
            "{} at {:#x} ({:#x} bytes)",
            source.name, module.base, module.total_size
        );
        let id = ModuleId(self.modules.len());
        self.modules.push((source.name.clone(), module));
        Ok(id)
    }

    /// Builds the initial stack: `runtime` supplies `AT_BASE`, `target` the
    /// program headers and entry point.
    pub fn setup_stack(&mut self, runtime: ModuleId, target: ModuleId) -> Result<StackImage> {
        let runtime = &lookup(&self.modules, runtime)?.1;
        let target = &lookup(&self.modules, target)?.1;
        info!("setup_stack: runtime at {:#x}, target at {:#x}", runtime.base, target.base);
        stack::build(
            &mut self.arena,
            &self.arch,
            self.stack_region,
            STACK_SIZE as u64,
            runtime,
            target,
            self.page_size,
        )
    }

    /// Traps `detours` inside `runtime`, writing the patch table into `support`.
    pub fn setup_detours(
        &mut self,
        runtime: ModuleId,
        support: ModuleId,
        layout: &SupportLayout,
        detours: &[Detour],
    ) -> Result<PatchRecord> {
        let table = lookup(&self.modules, support)?.1.base + layout.detours_offset;
        let runtime = &lookup(&self.modules, runtime)?.1;
        detour::install(&mut self.arena, &self.arch, runtime, detours, table)
    }

    /// Records `libraries` under their load names in the support module's registry.
    pub fn register_libraries(
        &mut self,
        support: ModuleId,
        layout: &SupportLayout,
        libraries: &[ModuleId],
    ) -> Result<Registry> {
        let base = lookup(&self.modules, support)?.1.base + layout.registry_offset;
        let mut registry = Registry::new(base, libraries.len());
        for id in libraries {
            let (name, module) = lookup(&self.modules, *id)?;
            let name = LibraryName::try_from(name.as_str())?;
            registry.register(&mut self.arena, &self.arch, &name, module.base)?;
        }
        Ok(registry)
    }

    /// Runs every step short of the trap handler and the jump.
    pub fn prepare(&mut self, plan: &LoadPlan<'_>, inflater: &impl Inflater) -> Result<Prepared> {
        let runtime = self.load(&plan.runtime, inflater)?;
        let support = self.load(&plan.support, inflater)?;
        let libraries = plan
            .libraries
            .iter()
            .map(|source| self.load(source, inflater))
            .collect::<Result<Vec<_>>>()?;
        info!("finished loading libraries");

        let stack = self.setup_stack(runtime, support)?;
        let detours = self.setup_detours(runtime, support, &plan.support_layout, &plan.detours)?;
        let registry = self.register_libraries(support, &plan.support_layout, &libraries)?;
        let trap_handler =
            lookup(&self.modules, support)?.1.base + plan.support_layout.trap_handler_offset;

        Ok(Prepared {
            runtime,
            support,
            libraries,
            stack,
            detours,
            registry,
            trap_handler,
        })
    }

    /// Transfers control to `runtime`'s entry point on the prepared stack.
    ///
    /// Never returns: if the backend cannot jump, or the runtime comes back, the
    /// process state is no longer trustworthy and the process is crashed.
    pub fn enter(&self, runtime: ModuleId, stack: &StackImage) -> ! {
        let entry = match lookup(&self.modules, runtime) {
            Ok((_, module)) => module.entry_address(),
            Err(err) => {
                error!("{}", err);
                sys::crash()
            }
        };
        info!("--> ENTERING POINT OF NO RETURN <--");
        let result: Result<Infallible> = unsafe { self.arch.enter(entry, stack.stack_pointer) };
        match result {
            Err(err) => error!("control transfer to {:#x} failed: {}", entry, err),
            Ok(never) => match never {},
        }
        sys::crash()
    }
}
