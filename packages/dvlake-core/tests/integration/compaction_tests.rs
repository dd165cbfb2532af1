//! Compaction: physical removal of tombstones and retirement of vectors.

use ntest::timeout;
use tempfile::tempdir;

use dvlake_core::{DvError, Operation, Predicate, Value};

use super::helpers::{artifact_count, table_with_customers, visible_ids};

/// Test 3.1: Compaction preserves visible rows and drops the vector
#[timeout(5000)]
#[test]
fn test_compaction_preserves_visible_rows() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 30, 10);
    table
        .delete(&Predicate::lt("id", Value::Int(4)).or(Predicate::eq("id", Value::Int(17))))
        .unwrap();
    let before_compaction = table.current();
    let mut visible_before = visible_ids(&table);
    visible_before.sort_unstable();

    let report = table.compact_all_eligible().unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.rows_dropped(), 5);
    assert_eq!(report.races, 0);

    let version = table.current();
    assert_eq!(version.files_with_deletion_vectors(), 0);
    assert_eq!(version.physical_rows(), 25);
    assert!(matches!(version.operation, Operation::Compact { .. }));
    // Replacement files get new ids, so scan order changes.
    let mut visible_after = visible_ids(&table);
    visible_after.sort_unstable();
    assert_eq!(visible_after, visible_before);

    // Artifacts and old data files stay for older versions.
    assert_eq!(artifact_count(dir.path()), 2);
    assert_eq!(
        table.scan_version(&before_compaction).unwrap().count().unwrap(),
        25
    );
    assert!(table.deletion_vectors().is_retired(1));
    assert!(table.deletion_vectors().is_retired(2));
    assert!(!table.deletion_vectors().is_retired(3));
}

/// Test 3.2: Compacting a file that is not live fails
#[timeout(3000)]
#[test]
fn test_compact_unknown_file() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    assert!(matches!(
        table.compact(42),
        Err(DvError::FileNotFound { file_id: 42, .. })
    ));
}

/// Test 3.3: A delete planned before compaction replans onto the new file
#[timeout(5000)]
#[test]
fn test_delete_across_compaction() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    table.delete(&Predicate::eq("id", Value::Int(0))).unwrap();
    let stale = table.current();

    let replacement = table.compact(1).unwrap().unwrap();
    assert_eq!(replacement.row_count, 9);

    let outcome = table
        .delete_at(stale, &Predicate::eq("id", Value::Int(5)))
        .unwrap();
    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.deleted_rows, 1);

    assert_eq!(visible_ids(&table), vec![1, 2, 3, 4, 6, 7, 8, 9]);
    let dv = table.deletion_vector(replacement.id).unwrap().unwrap();
    // Id 5 sits at position 4 of the compacted file.
    assert_eq!(dv.iter().collect::<Vec<_>>(), vec![4]);
}

/// Test 3.4: Nothing eligible means no new version
#[timeout(3000)]
#[test]
fn test_nothing_to_compact() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    let report = table.compact_all_eligible().unwrap();
    assert!(report.version.is_none());
    assert!(report.files.is_empty());
    assert_eq!(table.current().version, 1);
}
