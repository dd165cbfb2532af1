//! Scan and delete benchmarks.
//!
//! Measures the read-time cost of deletion vectors against a clean file and
//! the cost of a deletion-vector delete against a legacy rewrite.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dvlake_core::{ColumnDef, ColumnType, Predicate, Row, Schema, Table, TableConfig, Value};
use rand::Rng;
use std::hint::black_box;
use std::time::Duration;
use tempfile::TempDir;

const ROWS: i64 = 200_000;

fn schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("customer_id", ColumnType::Int64),
        ColumnDef::new("last_purchase_date", ColumnType::Date),
    ])
    .expect("valid schema")
}

fn rows() -> Vec<Row> {
    let mut rng = rand::thread_rng();
    (0..ROWS)
        .map(|i| vec![Value::Int(i), Value::Date(rng.gen_range(0..1000))])
        .collect()
}

/// Creates a table and optionally tombstones a fraction of its rows.
fn build_table(deleted_permille: i32, deletion_vectors_enabled: bool) -> (TempDir, Table) {
    let dir = TempDir::new().expect("temp dir");
    let config = TableConfig {
        rows_per_file: 65_536,
        deletion_vectors_enabled,
        ..TableConfig::new(dir.path())
    };
    let table = Table::create(config, schema()).expect("create table");
    table.append(rows()).expect("append rows");
    if deleted_permille > 0 {
        table
            .delete(&Predicate::lt("last_purchase_date", Value::Date(deleted_permille)))
            .expect("delete rows");
    }
    (dir, table)
}

/// Benchmark: full scan with increasing tombstone density
fn benchmark_scan_with_deletion_vectors(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_with_deletion_vectors");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for permille in [0, 10, 100, 500] {
        let (_dir, table) = build_table(permille, true);
        group.bench_with_input(BenchmarkId::from_parameter(permille), &permille, |b, _| {
            b.iter(|| {
                let scan = table.scan().expect("scan");
                black_box(scan.count().expect("count"))
            })
        });
    }
    group.finish();
}

/// Benchmark: delete of about 1% of rows, deletion vectors versus rewrite
fn benchmark_delete_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_one_percent");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for (name, enabled) in [("deletion_vectors", true), ("rewrite", false)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || build_table(0, enabled),
                |(dir, table)| {
                    let outcome = table
                        .delete(&Predicate::lt("last_purchase_date", Value::Date(10)))
                        .expect("delete");
                    black_box((dir, outcome))
                },
                criterion::BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_scan_with_deletion_vectors,
    benchmark_delete_modes
);
criterion_main!(benches);
