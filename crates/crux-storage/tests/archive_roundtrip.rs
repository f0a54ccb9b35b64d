use std::collections::{BTreeMap, BTreeSet};

use crux_core::{FileId, Location, LocationListTable, Symbol, SymbolFlags, SymbolKind, SymbolTable};
use crux_storage::{write_archive_atomic, ArtifactKind, PersistedArchive, StorageError};
use pretty_assertions::assert_eq;

const SCHEMA: u32 = 1;

fn loc(file: u32, line: u32, column: u32) -> Location {
    Location::new(FileId::from_raw(file), line, column)
}

fn sample_table() -> SymbolTable {
    let mut symbols = BTreeMap::new();
    for (line, usr) in [(2, "c:@F@main"), (7, "c:@F@helper")] {
        let at = loc(1, line, 5);
        symbols.insert(
            at,
            Symbol {
                location: at,
                kind: SymbolKind::Function,
                flags: SymbolFlags::DEFINITION,
                usr: usr.to_string(),
                name: usr.trim_start_matches("c:@F@").to_string(),
                length: 6,
                end_line: line + 2,
                end_column: 1,
                base_usrs: Vec::new(),
            },
        );
    }
    SymbolTable::from_symbols(symbols)
}

#[test]
fn symbol_table_round_trips_through_disk() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("1").join("symbols");

    let table = sample_table();
    write_archive_atomic(&path, ArtifactKind::Symbols, SCHEMA, &table).unwrap();

    let archive =
        PersistedArchive::<SymbolTable>::open(&path, ArtifactKind::Symbols, SCHEMA).unwrap();
    assert_eq!(archive.archived().len(), 2);

    let (index, symbol) = archive.archived().get(&loc(1, 7, 5)).expect("exact hit");
    assert_eq!(index, 1);
    assert_eq!(symbol.usr, "c:@F@helper");

    let owned = archive.to_owned().unwrap();
    assert_eq!(owned, table);
}

#[test]
fn open_optional_returns_none_for_missing_file() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("nope");
    let result =
        PersistedArchive::<SymbolTable>::open_optional(&missing, ArtifactKind::Symbols, SCHEMA)
            .unwrap();
    assert!(result.is_none());
}

#[test]
fn wrong_kind_and_schema_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("2").join("symbols");
    write_archive_atomic(&path, ArtifactKind::Symbols, SCHEMA, &sample_table()).unwrap();

    match PersistedArchive::<SymbolTable>::open(&path, ArtifactKind::Targets, SCHEMA) {
        Err(StorageError::WrongArtifact { .. }) => {}
        other => panic!("expected WrongArtifact, got {other:?}"),
    }

    match PersistedArchive::<SymbolTable>::open(&path, ArtifactKind::Symbols, SCHEMA + 1) {
        Err(StorageError::WrongSchema { .. }) => {}
        other => panic!("expected WrongSchema, got {other:?}"),
    }
}

#[test]
fn corrupted_payload_fails_hash_check() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("3").join("symbols");
    write_archive_atomic(&path, ArtifactKind::Symbols, SCHEMA, &sample_table()).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    match PersistedArchive::<SymbolTable>::open(&path, ArtifactKind::Symbols, SCHEMA) {
        Err(StorageError::HashMismatch { .. }) | Err(StorageError::Validation(_)) => {}
        other => panic!("expected corruption error, got {other:?}"),
    }
}

#[test]
fn location_list_table_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("4").join("symnames");

    let mut map: BTreeMap<String, BTreeSet<Location>> = BTreeMap::new();
    map.entry("helper".into()).or_default().insert(loc(1, 7, 5));
    map.entry("main".into()).or_default().insert(loc(1, 2, 5));

    let table = LocationListTable::from_map(map);
    write_archive_atomic(&path, ArtifactKind::SymbolNames, SCHEMA, &table).unwrap();

    let archive =
        PersistedArchive::<LocationListTable>::open(&path, ArtifactKind::SymbolNames, SCHEMA)
            .unwrap();
    assert_eq!(archive.archived().get("main"), Some(vec![loc(1, 2, 5)]));
    assert_eq!(archive.archived().get("absent"), None);
}
