use nxld::arch::mips::Mips;
use nxld::arch::Architecture;
use nxld::arena::{AddressSpace, Arena};
use nxld::error::LoaderError;
use nxld::registry::{LibraryName, Registry, ENTRY_SIZE, NAME_CAPACITY};

const BASE: u64 = 0x6000_0000;

const LIBRARIES: [(&str, u64); 5] = [
    ("/nx/libpcap.so", 0x6010_0000),
    ("/nx/libcrypto.so.1.0.0", 0x6020_0000),
    ("/nx/libssl.so.1.0.0", 0x6030_0000),
    ("/nx/libsupport.so", 0x6040_0000),
    ("/nx/libmetsrv_main.so", 0x6050_0000),
];

#[test]
fn five_libraries_make_five_sequential_records() {
    let arch = Mips::big();
    let mut arena = Arena::with_base_address(vec![0xeeu8; 0x1000], BASE);
    let table = BASE + 0x200;
    let mut registry = Registry::new(table, LIBRARIES.len());

    let addresses: Vec<u64> = LIBRARIES
        .iter()
        .map(|(name, base)| {
            let name = LibraryName::try_from(*name).unwrap();
            registry.register(&mut arena, &arch, &name, *base).unwrap()
        })
        .collect();

    assert_eq!(registry.len(), 5);
    for (i, address) in addresses.iter().enumerate() {
        assert_eq!(*address, table + (i * ENTRY_SIZE) as u64);
    }

    for (i, (name, base)) in LIBRARIES.iter().enumerate() {
        let record = arena.bytes(table + (i * ENTRY_SIZE) as u64, ENTRY_SIZE).unwrap();
        let stored = &record[..NAME_CAPACITY];
        let len = stored.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&stored[..len], name.as_bytes());
        assert!(stored[len..].iter().all(|&b| b == 0));

        let first = arch.read_word([record[32], record[33], record[34], record[35]]);
        let second = arch.read_word([record[36], record[37], record[38], record[39]]);
        assert_eq!(u64::from(first), *base);
        assert_eq!(second, 0);
    }

    // Nothing past the last record was touched.
    let after = arena.bytes(table + (5 * ENTRY_SIZE) as u64, 16).unwrap();
    assert!(after.iter().all(|&b| b == 0xee));
    let before = arena.bytes(table - 16, 16).unwrap();
    assert!(before.iter().all(|&b| b == 0xee));
}

#[test]
fn thirty_one_byte_names_survive_untruncated() {
    let arch = Mips::little();
    let mut arena = Arena::with_base_address(vec![0u8; 0x100], BASE);
    let mut registry = Registry::new(BASE, 1);
    let name = "/nx/abcdefghijklmnopqrstuvwxyz0";
    assert_eq!(name.len(), 31);

    registry
        .register(&mut arena, &arch, &LibraryName::try_from(name).unwrap(), 0x1234)
        .unwrap();
    assert_eq!(arena.bytes(BASE, 31).unwrap(), name.as_bytes());
    assert_eq!(arena.bytes(BASE + 31, 1).unwrap(), &[0]);
}

#[test]
fn thirty_two_byte_names_are_fatal() {
    let name = "/nx/abcdefghijklmnopqrstuvwxyz01";
    assert_eq!(name.len(), 32);
    assert!(matches!(
        LibraryName::try_from(name),
        Err(LoaderError::NameTooLong { len: 32, .. })
    ));
}

#[test]
fn registering_past_capacity_is_fatal() {
    let arch = Mips::big();
    let mut arena = Arena::with_base_address(vec![0u8; 0x100], BASE);
    let mut registry = Registry::new(BASE, 1);
    let name = LibraryName::try_from("/nx/a.so").unwrap();

    registry.register(&mut arena, &arch, &name, 1).unwrap();
    assert!(matches!(
        registry.register(&mut arena, &arch, &name, 2),
        Err(LoaderError::RegistryFull { capacity: 1 })
    ));
    assert_eq!(registry.len(), 1);
}
