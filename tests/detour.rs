use nxld::arch::mips::Mips;
use nxld::arch::x86::X86;
use nxld::arch::Architecture;
use nxld::arena::{AddressSpace, Arena};
use nxld::detour::{apply, install, Detour, DetourRecord, PatchEntry, PatchPlan};
use nxld::error::LoaderError;
use nxld::mapper::LoadedModule;

const BASE: u64 = 0x5000_0000;

fn runtime_at(base: u64) -> LoadedModule {
    LoadedModule {
        base,
        total_size: 0x4000,
        entry: 0,
        program_headers: 52,
        program_header_count: 1,
        program_header_size: 32,
        segments: Vec::new(),
    }
}

/// An arena whose byte at `BASE + i` is `i as u8`.
fn text_arena() -> Arena<Vec<u8>> {
    let memory: Vec<u8> = (0..0x8000usize).map(|i| i as u8).collect();
    Arena::with_base_address(memory, BASE)
}

fn reference_detours() -> Vec<Detour> {
    vec![
        Detour::new("open", 0x100),
        Detour::new("close", 0x140),
        Detour::new("mmap", 0x200),
        Detour::new("fstat", 0x284),
        Detour::new("read", 0x300),
        Detour::new("pread", 0x3f0),
    ]
}

#[test]
fn plan_targets_follow_the_module_base_in_order() {
    let plan = PatchPlan::for_detours(&X86, &runtime_at(BASE), &reference_detours());
    let targets: Vec<u64> = plan.entries().iter().map(|entry| entry.target).collect();
    assert_eq!(
        targets,
        vec![BASE + 0x100, BASE + 0x140, BASE + 0x200, BASE + 0x284, BASE + 0x300, BASE + 0x3f0]
    );
    assert!(plan.entries().iter().all(|entry| entry.replacement == vec![0xcc]));
}

#[test]
fn apply_records_originals_before_trapping() {
    let arch = Mips::big();
    let mut arena = text_arena();
    let plan = PatchPlan::for_detours(&arch, &runtime_at(BASE), &[Detour::new("open", 0x10)]);

    let record = apply(&mut arena, &arch, &plan).unwrap();
    assert_eq!(
        record.records,
        vec![DetourRecord {
            patched_address: BASE + 0x10,
            original_instruction: 0x1011_1213,
        }]
    );
    assert_eq!(arena.bytes(BASE + 0x10, 4).unwrap(), &[0, 0, 0, 0x0d]);
    assert_eq!(arena.bytes(BASE + 0x14, 1).unwrap(), &[0x14]);
}

#[test]
fn x86_trap_only_replaces_the_first_byte() {
    let mut arena = text_arena();
    let plan = PatchPlan::for_detours(&X86, &runtime_at(BASE), &[Detour::new("read", 0x20)]);

    let record = apply(&mut arena, &X86, &plan).unwrap();
    assert_eq!(record.records[0].original_instruction, 0x2322_2120);
    assert_eq!(arena.bytes(BASE + 0x20, 4).unwrap(), &[0xcc, 0x21, 0x22, 0x23]);
}

#[test]
fn patch_table_holds_address_and_original_pairs() {
    let arch = Mips::little();
    let mut arena = text_arena();
    let table = BASE + 0x6000;

    let record = install(&mut arena, &arch, &runtime_at(BASE), &reference_detours(), table).unwrap();
    assert_eq!(record.records.len(), 6);
    assert_eq!(record.table_len(), 48);

    let bytes = arena.bytes(table, record.table_len()).unwrap().to_vec();
    for (i, expected) in record.records.iter().enumerate() {
        let word = |at: usize| arch.read_word([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        assert_eq!(u64::from(word(i * 8)), expected.patched_address);
        assert_eq!(word(i * 8 + 4), expected.original_instruction);
    }
    for detour in reference_detours() {
        assert_eq!(arena.bytes(BASE + detour.offset, 4).unwrap(), &[0x0d, 0, 0, 0]);
    }
}

#[test]
fn plans_can_be_built_by_hand() {
    let mut arena = text_arena();
    let mut plan = PatchPlan::new();
    plan.push(PatchEntry {
        name: "custom".to_string(),
        target: BASE + 0x40,
        replacement: vec![0xf4, 0xf4],
    });
    assert_eq!(plan.len(), 1);

    apply(&mut arena, &X86, &plan).unwrap();
    assert_eq!(arena.bytes(BASE + 0x40, 3).unwrap(), &[0xf4, 0xf4, 0x42]);
}

#[test]
fn targets_outside_memory_are_fatal() {
    let mut arena = text_arena();
    let plan = PatchPlan::for_detours(&X86, &runtime_at(BASE), &[Detour::new("open", 0x7ffe)]);
    assert!(matches!(
        apply(&mut arena, &X86, &plan),
        Err(LoaderError::OutOfBounds { .. })
    ));
}
