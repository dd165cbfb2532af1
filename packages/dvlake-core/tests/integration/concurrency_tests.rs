//! Concurrent writers: rebasing, replanning and lost-update freedom.

use std::sync::Arc;
use std::thread;

use ntest::timeout;
use tempfile::tempdir;

use dvlake_core::{Predicate, Table, TableConfig, Value};

use super::helpers::{config, customer_schema, customers, table_with_customers, visible_ids};

/// Test 2.1: Deletes on disjoint files both commit without a retry
#[timeout(3000)]
#[test]
fn test_disjoint_deletes_do_not_retry() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 20, 10);
    let snapshot = table.current();

    let first = table
        .delete_at(snapshot.clone(), &Predicate::eq("id", Value::Int(1)))
        .unwrap();
    let second = table
        .delete_at(snapshot, &Predicate::eq("id", Value::Int(15)))
        .unwrap();

    assert_eq!(first.retries, 0);
    assert_eq!(second.retries, 0);
    assert_eq!(second.rebases, 1);
    assert_eq!(second.version, first.version + 1);

    let visible = visible_ids(&table);
    assert!(!visible.contains(&1));
    assert!(!visible.contains(&15));
    assert_eq!(visible.len(), 18);
}

/// Test 2.2: Deletes on the same file serialize: one succeeds, one replans
#[timeout(3000)]
#[test]
fn test_same_file_deletes_retry_once() {
    let dir = tempdir().unwrap();
    let table = table_with_customers(dir.path(), 10, 10);
    let snapshot = table.current();

    let first = table
        .delete_at(snapshot.clone(), &Predicate::eq("id", Value::Int(1)))
        .unwrap();
    let second = table
        .delete_at(snapshot, &Predicate::eq("id", Value::Int(2)))
        .unwrap();

    assert_eq!(first.retries, 0);
    assert_eq!(second.retries, 1);

    // The replanned merge builds on the winner's vector.
    let dv = table.deletion_vector(1).unwrap().unwrap();
    assert_eq!(dv.iter().collect::<Vec<_>>(), vec![1, 2]);
}

/// Test 2.3: Threads deleting distinct rows of one file lose nothing
#[timeout(10000)]
#[test]
fn test_parallel_deletes_same_file() {
    let dir = tempdir().unwrap();
    let config = TableConfig {
        max_commit_retries: 64,
        ..config(dir.path(), 100)
    };
    let table = Arc::new(Table::create(config, customer_schema()).unwrap());
    table.append(customers(0..100)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table
                    .delete(&Predicate::eq("id", Value::Int(i * 10)))
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(outcomes.iter().all(|o| o.deleted_rows == 1));
    let dv = table.deletion_vector(1).unwrap().unwrap();
    assert_eq!(
        dv.iter().collect::<Vec<_>>(),
        vec![0, 10, 20, 30, 40, 50, 60, 70]
    );
    assert_eq!(table.current().version, 9);
}

/// Test 2.4: Two handles on one directory see each other's commits
#[timeout(5000)]
#[test]
fn test_two_handles_replan_through_disk() {
    let dir = tempdir().unwrap();
    let a = table_with_customers(dir.path(), 10, 10);
    let b = Table::open(config(dir.path(), 10)).unwrap();

    a.delete(&Predicate::eq("id", Value::Int(4))).unwrap();

    // `b` has not refreshed; its commit conflicts on disk and replans.
    let stale = b.current();
    assert_eq!(stale.version, 1);
    let outcome = b
        .delete_at(stale, &Predicate::eq("id", Value::Int(6)))
        .unwrap();
    assert_eq!(outcome.retries, 1);

    a.refresh().unwrap();
    assert_eq!(visible_ids(&a), vec![0, 1, 2, 3, 5, 7, 8, 9]);
    assert_eq!(visible_ids(&b), visible_ids(&a));
}

/// Test 2.5: Readers holding a snapshot are unaffected by later deletes
#[timeout(5000)]
#[test]
fn test_reader_snapshot_isolation() {
    let dir = tempdir().unwrap();
    let table = Arc::new(table_with_customers(dir.path(), 50, 10));
    let snapshot = table.current();
    let reader_scan = table.scan_version(&snapshot).unwrap();

    let writer = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            table
                .delete(&Predicate::lt("id", Value::Int(25)))
                .unwrap()
        })
    };
    writer.join().unwrap();

    assert_eq!(reader_scan.count().unwrap(), 50);
    assert_eq!(table.scan().unwrap().count().unwrap(), 25);
}
