//! Persistence: reopening tables and detecting corrupt artifacts.

use std::fs;

use ntest::timeout;
use tempfile::tempdir;

use dvlake_core::{DvError, Predicate, Table, Value};

use super::helpers::{config, customer_schema, table_with_customers, visible_ids};

/// Test 4.1: Reopening a table reproduces the newest version
#[timeout(5000)]
#[test]
fn test_reopen_reproduces_latest_version() {
    let dir = tempdir().unwrap();
    let expected = {
        let table = table_with_customers(dir.path(), 25, 10);
        table
            .delete(&Predicate::gt_eq("id", Value::Int(18)))
            .unwrap();
        table.delete(&Predicate::eq("id", Value::Int(3))).unwrap();
        (table.current().version, visible_ids(&table))
    };

    let reopened = Table::open(config(dir.path(), 10)).unwrap();
    assert_eq!(reopened.current().version, expected.0);
    assert_eq!(visible_ids(&reopened), expected.1);
    assert_eq!(reopened.schema(), customer_schema());

    let history = reopened.history().unwrap();
    assert_eq!(history.len() as u64, expected.0 + 1);
    assert_eq!(history[0].version, 0);
    assert!(history.windows(2).all(|w| w[1].parent == Some(w[0].version)));
}

/// Test 4.2: Creating a table twice in one directory fails
#[timeout(3000)]
#[test]
fn test_create_twice_fails() {
    let dir = tempdir().unwrap();
    table_with_customers(dir.path(), 1, 10);
    assert!(matches!(
        Table::create(config(dir.path(), 10), customer_schema()),
        Err(DvError::TableAlreadyExists(_))
    ));
}

/// Test 4.3: A corrupt deletion vector fails the read instead of resurrecting rows
#[timeout(5000)]
#[test]
fn test_corrupt_vector_fails_scan() {
    let dir = tempdir().unwrap();
    {
        let table = table_with_customers(dir.path(), 10, 10);
        table.delete(&Predicate::eq("id", Value::Int(7))).unwrap();
    }

    let artifact = fs::read_dir(dir.path().join("dv"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "dv"))
        .unwrap();
    let mut bytes = fs::read(&artifact).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5A;
    fs::write(&artifact, bytes).unwrap();

    let table = Table::open(config(dir.path(), 10)).unwrap();
    assert!(matches!(
        table.scan(),
        Err(DvError::CorruptBitmap { file_id: 1, .. })
    ));
    assert!(matches!(
        table.delete(&Predicate::eq("id", Value::Int(8))),
        Err(DvError::CorruptBitmap { .. })
    ));
}

/// Test 4.4: A corrupt data file chunk is reported, not decoded
#[timeout(5000)]
#[test]
fn test_corrupt_data_file_detected() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    let path = table.current().file(1).unwrap().file.path.clone();

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let result = table.scan().unwrap().collect_rows();
    assert!(matches!(result, Err(DvError::DataCorruption(_))));
}

/// Test 4.5: A manifest whose row count disagrees with the data file is an error, not a panic
#[timeout(5000)]
#[test]
fn test_manifest_row_count_mismatch_detected() {
    let dir = tempdir().unwrap();
    drop(table_with_customers(dir.path(), 10, 10));

    let manifest = dir
        .path()
        .join("_versions")
        .join(dvlake_core::version::manifest_name(1));
    let json = fs::read_to_string(&manifest).unwrap();
    assert!(json.contains("\"row_count\": 10"));
    fs::write(&manifest, json.replace("\"row_count\": 10", "\"row_count\": 12")).unwrap();

    let table = Table::open(config(dir.path(), 10)).unwrap();
    assert_eq!(table.current().physical_rows(), 12);
    assert!(matches!(
        table.scan().unwrap().collect_rows(),
        Err(DvError::DataCorruption(_))
    ));
    assert!(matches!(
        table.delete(&Predicate::eq("id", Value::Int(3))),
        Err(DvError::DataCorruption(_))
    ));
}
