//! End-to-end identification over synthetic Thumb firmware.

use chiprec::types::{AddressOrigin, Peripheral};
use chiprec::{
    extractor, identify, identify_file, ChipDatabase, ChipId, ChipProfile, FirmwareImage,
    IdentifyError, IdentifyOptions,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

const NOP: u16 = 0xBF00;

fn halfwords(hws: &[u16]) -> Vec<u8> {
    hws.iter().flat_map(|hw| hw.to_le_bytes()).collect()
}

/// `ldr r0, [pc, #4]; ldr r1, [pc, #8]; nop; nop` then the two literals.
fn literal_firmware(first: u32, second: u32) -> Vec<u8> {
    let mut bytes = halfwords(&[0x4801, 0x4902, NOP, NOP]);
    bytes.extend_from_slice(&first.to_le_bytes());
    bytes.extend_from_slice(&second.to_le_bytes());
    bytes
}

fn abc() -> ChipDatabase {
    ChipDatabase::new([
        ChipProfile::from_base_addresses(ChipId::new("", "ChipA"), [0x4001_0000, 0x4002_0000]),
        ChipProfile::from_base_addresses(ChipId::new("", "ChipB"), [0x4001_0000]),
        ChipProfile::from_base_addresses(ChipId::new("", "ChipC"), [0x5000_0000]),
    ])
}

#[test]
fn extraction_is_deterministic() {
    let image = FirmwareImage::with_base(literal_firmware(0x4001_0000, 0x4002_0000), 0x0800_0000);
    let options = IdentifyOptions::new();
    let first = extractor::extract(&image, &options).unwrap();
    for _ in 0..3 {
        assert_eq!(extractor::extract(&image, &options).unwrap(), first);
    }
}

#[test]
fn narrow_literal_load_is_extracted() {
    let image = FirmwareImage::new(literal_firmware(0x4002_1000, 0x4800_0400));
    let report = extractor::extract_report(&image, &IdentifyOptions::new()).unwrap();
    assert_eq!(
        report.addresses(),
        BTreeSet::from([0x4002_1000, 0x4800_0400])
    );
    assert!(report
        .candidates
        .iter()
        .all(|c| c.origin == AddressOrigin::LiteralPool));
}

#[test]
fn wide_literal_load_is_extracted() {
    // ldr.w r2, [pc, #8] -> literal at align(0x04) + 8 = 0x0C
    let mut bytes = halfwords(&[0xF8DF, 0x2008, NOP, NOP, NOP, NOP]);
    bytes.extend_from_slice(&0x4000_4400u32.to_le_bytes());

    let report = extractor::extract_report(&FirmwareImage::new(bytes), &IdentifyOptions::new())
        .unwrap();
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].address, 0x4000_4400);
    assert_eq!(report.candidates[0].origin, AddressOrigin::LiteralPoolWide);
}

#[test]
fn split_immediate_is_extracted() {
    // movw r3, #0x3800; movt r3, #0x4001
    let adjacent = halfwords(&[0xF643, 0x0300, 0xF2C4, 0x0301]);
    let addresses = extractor::extract(&FirmwareImage::new(adjacent), &IdentifyOptions::new())
        .unwrap();
    assert!(addresses.contains(&0x4001_3800));

    // Same pair with two unrelated instructions in between
    let gapped = halfwords(&[0xF643, 0x0300, NOP, 0x2105, 0xF2C4, 0x0301]);
    let addresses = extractor::extract(&FirmwareImage::new(gapped), &IdentifyOptions::new())
        .unwrap();
    assert!(addresses.contains(&0x4001_3800));
}

#[test]
fn addresses_below_threshold_are_dropped() {
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x2000_0400));
    let report = extractor::extract_report(&image, &IdentifyOptions::new()).unwrap();
    assert_eq!(report.addresses(), BTreeSet::from([0x4001_0000]));
    assert_eq!(report.discarded, 1);

    let low = IdentifyOptions {
        mmio_threshold: 0x2000_0000,
        ..IdentifyOptions::new()
    };
    let addresses = extractor::extract(&image, &low).unwrap();
    assert!(addresses.contains(&0x2000_0400));
}

#[test]
fn split_immediate_below_threshold_is_dropped() {
    // movw r3, #0x0400; movt r3, #0x2000
    let image = FirmwareImage::new(halfwords(&[0xF240, 0x4300, 0xF2C2, 0x0300]));
    let report = extractor::extract_report(&image, &IdentifyOptions::new()).unwrap();
    assert!(report.candidates.is_empty());
    assert_eq!(report.discarded, 1);

    let low = IdentifyOptions {
        mmio_threshold: 0x2000_0000,
        ..IdentifyOptions::new()
    };
    let report = extractor::extract_report(&image, &low).unwrap();
    assert_eq!(report.addresses(), BTreeSet::from([0x2000_0400]));
    assert_eq!(report.candidates[0].origin, AddressOrigin::SplitImmediate);
}

#[test]
fn reference_scenario() {
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x4002_0000));
    let options = IdentifyOptions {
        include_eliminated: true,
        ..IdentifyOptions::new()
    };
    let report = identify(&image, &abc(), &options).unwrap();

    let scores: Vec<_> = report
        .matches
        .candidates
        .iter()
        .map(|c| (c.chip.name.as_str(), c.score, c.eliminated))
        .collect();
    assert_eq!(
        scores,
        vec![
            ("ChipA", 1.0, false),
            ("ChipB", 0.5, false),
            ("ChipC", 0.0, true),
        ]
    );

    let default = identify(&image, &abc(), &IdentifyOptions::new()).unwrap();
    assert!(default
        .matches
        .candidates
        .iter()
        .all(|c| c.chip.name != "ChipC"));
}

#[test]
fn identical_layouts_tie() {
    let database = ChipDatabase::new([
        ChipProfile::from_base_addresses(ChipId::new("ST", "F103xB"), [0x4001_0000, 0x4002_0000]),
        ChipProfile::from_base_addresses(ChipId::new("ST", "F103x8"), [0x4001_0000, 0x4002_0000]),
    ]);
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x4002_0000));
    let report = identify(&image, &database, &IdentifyOptions::new()).unwrap();

    let ties: Vec<_> = report
        .matches
        .best_ties()
        .iter()
        .map(|c| c.chip.name.as_str())
        .collect();
    assert_eq!(ties, vec!["F103x8", "F103xB"]);
    assert_eq!(report.matches.candidates[0].score, report.matches.candidates[1].score);
}

#[test]
fn explanation_names_peripherals() {
    let database = ChipDatabase::new([ChipProfile::new(ChipId::new("ST", "F103"))
        .with_peripheral(Peripheral::new("GPIOA", 0x4001_0000))
        .with_peripheral(Peripheral::new("DMA1", 0x4002_0000))]);
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x4003_0000));
    let report = identify(&image, &database, &IdentifyOptions::new()).unwrap();

    let best = report.matches.best().unwrap();
    assert_eq!(best.explanation.matched[0].peripheral.as_deref(), Some("GPIOA"));
    assert_eq!(best.explanation.unmatched, vec![0x4003_0000]);
}

#[test]
fn empty_database_has_no_candidates() {
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x4002_0000));
    let err = identify(&image, &ChipDatabase::default(), &IdentifyOptions::new()).unwrap_err();
    assert!(matches!(err, IdentifyError::NoCandidates { .. }));
}

#[test]
fn empty_firmware_is_invalid() {
    let err = identify(&FirmwareImage::new(Vec::new()), &abc(), &IdentifyOptions::new())
        .unwrap_err();
    assert!(matches!(err, IdentifyError::InvalidInput { .. }));
}

#[test]
fn file_and_json_database_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = dir.path().join("firmware.bin");
    let database = dir.path().join("chips.json");
    std::fs::write(&firmware, literal_firmware(0x4001_0000, 0x4002_0000)).unwrap();
    abc().to_json_file(&database).unwrap();

    let loaded = ChipDatabase::from_json_file(&database).unwrap();
    let report = identify_file(&firmware, 0x0800_0000, &loaded, &IdentifyOptions::new()).unwrap();
    assert_eq!(report.base_address, 0x0800_0000);
    assert_eq!(report.matches.best().unwrap().chip.name, "ChipA");
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_database_matches_like_json() {
    use chiprec::database::sqlite::{SqliteDatabase, SCHEMA};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chips.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(
        r#"
        INSERT INTO device (id, device_name, device_vendor, svd_filename)
            VALUES (1, 'ChipA', NULL, 'ChipA.svd'), (2, 'ChipB', NULL, 'ChipB.svd'),
                   (3, 'ChipC', NULL, 'ChipC.svd');
        INSERT INTO peripheral (device_id, peripheral_name, peripheral_address)
            VALUES (1, 'GPIOA', 1073807360), (1, 'DMA1', 1073872896),
                   (2, 'GPIOA', 1073807360), (3, 'UART0', 1342177280);
        "#,
    )
    .unwrap();
    drop(conn);

    let sqlite = SqliteDatabase::open(&path).unwrap();
    let image = FirmwareImage::new(literal_firmware(0x4001_0000, 0x4002_0000));
    let from_sqlite = identify(&image, &sqlite, &IdentifyOptions::new()).unwrap();

    let names: Vec<_> = from_sqlite
        .matches
        .candidates
        .iter()
        .map(|c| c.chip.name.as_str())
        .collect();
    assert_eq!(names, vec!["ChipA", "ChipB"]);
    assert_eq!(from_sqlite.matches.candidates[0].source.as_deref(), Some("ChipA.svd"));
}
