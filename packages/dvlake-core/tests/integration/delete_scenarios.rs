//! Delete scenarios: visibility, idempotence, pruning and legacy rewrites.

use ntest::timeout;
use tempfile::tempdir;

use dvlake_core::{DvError, FileScan, Predicate, Table, TableConfig, Value};

use super::helpers::{
    artifact_count, config, customer, customer_schema, customers, table_with_customers,
    visible_ids,
};

fn ids(values: &[i64]) -> Predicate {
    values
        .iter()
        .map(|&id| Predicate::eq("id", Value::Int(id)))
        .reduce(Predicate::or)
        .unwrap()
}

/// Test 1.1: Ten rows, delete positions {2, 5, 7}
///
/// Scan yields seven rows in order; repeating the delete changes nothing.
#[timeout(3000)]
#[test]
fn test_delete_three_of_ten() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);

    let outcome = table.delete(&ids(&[2, 5, 7])).unwrap();
    assert_eq!(outcome.deleted_rows, 3);
    assert_eq!(outcome.files_marked, 1);
    assert_eq!(visible_ids(&table), vec![0, 1, 3, 4, 6, 8, 9]);

    let dv = table.deletion_vector(1).unwrap().unwrap();
    assert_eq!(dv.cardinality(), 3);
    assert_eq!(dv.iter().collect::<Vec<_>>(), vec![2, 5, 7]);

    let version_after_first = table.current().version;
    let repeat = table.delete(&ids(&[2, 5, 7])).unwrap();
    assert!(repeat.is_noop());
    assert_eq!(repeat.version, version_after_first);
    assert_eq!(table.current().version, version_after_first);
    assert_eq!(table.deletion_vector(1).unwrap().unwrap().cardinality(), 3);
    assert_eq!(artifact_count(dir.path()), 1);
}

/// Test 1.2: Surviving rows are unchanged
#[timeout(3000)]
#[test]
fn test_surviving_rows_identical() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 50, 16);
    table
        .delete(&Predicate::lt("last_purchase_date", Value::Date(200)))
        .unwrap();

    let rows = table.scan().unwrap().collect_rows().unwrap();
    assert_eq!(rows.len(), 30);
    for (row, id) in rows.iter().zip(20..50) {
        assert_eq!(row.values, customer(id));
    }
}

/// Test 1.3: Data files are never rewritten in deletion-vector mode
#[timeout(3000)]
#[test]
fn test_data_files_untouched() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 40, 10);
    let before: Vec<(std::path::PathBuf, Vec<u8>)> = table
        .current()
        .files
        .values()
        .map(|e| (e.file.path.clone(), std::fs::read(&e.file.path).unwrap()))
        .collect();

    table
        .delete(&Predicate::compare(
            "id",
            dvlake_core::CompareOp::NotEq,
            Value::Int(13),
        )
        .and(Predicate::gt_eq("id", Value::Int(11))))
        .unwrap();

    for (path, bytes) in before {
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }
}

/// Test 1.4: A file matched entirely by statistics is dropped without a bitmap
#[timeout(3000)]
#[test]
fn test_whole_file_pruning() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 30, 10);

    let outcome = table
        .delete(&Predicate::lt("last_purchase_date", Value::Date(100)))
        .unwrap();
    assert_eq!(outcome.files_removed, 1);
    assert_eq!(outcome.files_marked, 0);
    assert_eq!(outcome.deleted_rows, 10);
    assert_eq!(outcome.plan_stats.files_matched_by_stats, 1);
    assert_eq!(outcome.plan_stats.files_pruned, 2);
    assert_eq!(outcome.plan_stats.files_scanned, 0);

    assert_eq!(artifact_count(dir.path()), 0);
    assert!(table.current().file(1).is_err());
    assert_eq!(visible_ids(&table), (10..30).collect::<Vec<_>>());
}

/// Test 1.5: Tombstones plus new matches covering a file remove it
#[timeout(3000)]
#[test]
fn test_full_coverage_removes_file() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    table.delete(&ids(&[0, 1, 2, 3, 4])).unwrap();

    let outcome = table.delete(&ids(&[5, 6, 7, 8, 9, 3])).unwrap();
    assert_eq!(outcome.files_removed, 1);
    assert_eq!(outcome.deleted_rows, 5);
    assert!(table.current().files.is_empty());
    assert!(visible_ids(&table).is_empty());
}

/// Test 1.6: Legacy mode rewrites files and never writes deletion vectors
#[timeout(3000)]
#[test]
fn test_legacy_mode_rewrites() {
    let dir = tempdir().unwrap();
    let config = TableConfig {
        deletion_vectors_enabled: false,
        ..config(dir.path(), 10)
    };
    let table = Table::create(config, customer_schema()).unwrap();
    table.append(customers(0..20)).unwrap();
    let original_path = table.current().file(1).unwrap().file.path.clone();

    let outcome = table.delete(&ids(&[3, 4, 15])).unwrap();
    assert_eq!(outcome.files_rewritten, 2);
    assert_eq!(outcome.files_marked, 0);
    assert_eq!(artifact_count(dir.path()), 0);

    let version = table.current();
    assert_eq!(version.files_with_deletion_vectors(), 0);
    assert!(version.file(1).is_err());
    assert!(version.file(2).is_err());
    assert_eq!(version.live_rows(), 17);
    assert!(original_path.exists());

    let mut expected: Vec<i64> = (0..20).filter(|id| ![3, 4, 15].contains(id)).collect();
    expected.sort_unstable();
    assert_eq!(visible_ids(&table), expected);
}

/// Test 1.7: Older versions keep reading their own deletion state
#[timeout(3000)]
#[test]
fn test_time_travel_reads() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    let before = table.current();

    table.delete(&ids(&[1])).unwrap();
    table.delete(&ids(&[2])).unwrap();

    assert_eq!(table.scan_version(&before).unwrap().count().unwrap(), 10);
    let middle = table.version(before.version + 1).unwrap();
    assert_eq!(table.scan_version(&middle).unwrap().count().unwrap(), 9);
    assert_eq!(table.scan().unwrap().count().unwrap(), 8);
}

/// Test 1.8: Scans with projection and an extra filter
#[timeout(3000)]
#[test]
fn test_projected_filtered_scan() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    table.delete(&ids(&[1, 2])).unwrap();

    let version = table.current();
    let scan: FileScan = table
        .file_scan(&version, 1)
        .unwrap()
        .with_projection(vec!["name".to_string()])
        .with_filter(Predicate::lt("id", Value::Int(4)));
    let names: Vec<Value> = scan.rows().unwrap().flat_map(|r| r.values).collect();
    assert_eq!(
        names,
        vec![Value::Str("user_0".into()), Value::Str("user_3".into())]
    );
}

/// Test 1.9: Predicates are validated before anything is planned
#[timeout(3000)]
#[test]
fn test_invalid_predicates() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);

    assert!(matches!(
        table.delete(&Predicate::lt("last_purchase_date", Value::Int(3))),
        Err(DvError::TypeMismatch { .. })
    ));
    assert!(matches!(
        table.delete(&Predicate::lt("missing", Value::Int(3))),
        Err(DvError::ColumnNotFound { .. })
    ));
    assert_eq!(table.current().version, 1);
}
