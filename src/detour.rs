//! Detours.
//!
//! A fixed set of runtime functions get their first instruction replaced by a
//! trap. The support module's SIGTRAP handler later finds the original word in
//! the patch table and resumes or substitutes the call.
//!
//! Deciding what to overwrite (`PatchPlan`) is kept apart from overwriting it
//! (`apply`), so plans can be checked and applied against plain buffers.

use tracing::{debug, info};

use crate::arch::{Architecture, WORD_SIZE};
use crate::arena::AddressSpace;
use crate::error::Result;
use crate::mapper::LoadedModule;
use crate::sys;

/// A function to intercept, by offset inside the runtime module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detour {
    pub name: String,
    pub offset: u64,
}

impl Detour {
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub name: String,
    pub target: u64,
    pub replacement: Vec<u8>,
}

/// What will be overwritten, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchPlan {
    entries: Vec<PatchEntry>,
}

impl PatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans a trap over each detour's entry inside `module`, keeping the given order.
    pub fn for_detours<A: Architecture + ?Sized>(arch: &A, module: &LoadedModule, detours: &[Detour]) -> Self {
        let trap = arch.trap_instruction();
        let entries = detours
            .iter()
            .map(|detour| PatchEntry {
                name: detour.name.clone(),
                target: module.base + detour.offset,
                replacement: trap.clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn push(&mut self, entry: PatchEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One patched entry point and the instruction word it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetourRecord {
    pub patched_address: u64,
    pub original_instruction: u32,
}

/// The side table produced by [`apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchRecord {
    pub records: Vec<DetourRecord>,
}

impl PatchRecord {
    /// Size of the serialised table in bytes.
    pub fn table_len(&self) -> usize {
        self.records.len() * 2 * WORD_SIZE
    }

    /// Serialises the records as `{ patched_address, original_instruction }` word pairs at `table`.
    pub fn write_table<S, A>(&self, space: &mut S, arch: &A, table: u64) -> Result<()>
    where
        S: AddressSpace + ?Sized,
        A: Architecture + ?Sized,
    {
        let mut bytes = Vec::with_capacity(self.table_len());
        for record in &self.records {
            bytes.extend_from_slice(&arch.word(record.patched_address)?);
            bytes.extend_from_slice(&arch.word(u64::from(record.original_instruction))?);
        }
        space.write(table, &bytes)
    }
}

/// Applies `plan`, recording the first instruction word of every target before overwriting it.
pub fn apply<S, A>(space: &mut S, arch: &A, plan: &PatchPlan) -> Result<PatchRecord>
where
    S: AddressSpace + ?Sized,
    A: Architecture + ?Sized,
{
    let mut record = PatchRecord::default();
    for entry in plan.entries() {
        let mut original = [0u8; WORD_SIZE];
        original.copy_from_slice(space.bytes(entry.target, WORD_SIZE)?);
        let original_instruction = arch.read_word(original);

        space.write(entry.target, &entry.replacement)?;
        debug!(
            "detoured {} at {:#x} (was {:#010x})",
            entry.name, entry.target, original_instruction
        );
        record.records.push(DetourRecord {
            patched_address: entry.target,
            original_instruction,
        });
    }
    Ok(record)
}

/// Patches `detours` inside `runtime` and publishes the side table at `table`.
pub fn install<S, A>(
    space: &mut S,
    arch: &A,
    runtime: &LoadedModule,
    detours: &[Detour],
    table: u64,
) -> Result<PatchRecord>
where
    S: AddressSpace + ?Sized,
    A: Architecture + ?Sized,
{
    let plan = PatchPlan::for_detours(arch, runtime, detours);
    let record = apply(space, arch, &plan)?;
    record.write_table(space, arch, table)?;
    info!("detours setup");
    Ok(record)
}

/// Makes `handler` the process-wide SIGTRAP handler.
///
/// # Safety
/// `handler` must point at the support module's handler inside live, executable
/// arena memory.
pub unsafe fn install_trap_handler(handler: u64) -> Result<()> {
    debug!("trap handler at {:#x}", handler);
    unsafe { sys::install_trap_handler(handler as usize) }
}
