//! Shared fixtures for integration tests.

use std::path::Path;

use dvlake_core::{ColumnDef, ColumnType, Row, Schema, Table, TableConfig, Value};

/// Schema used by most tests: `id`, `name`, `last_purchase_date`.
pub fn customer_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("id", ColumnType::Int64),
        ColumnDef::new("name", ColumnType::Utf8),
        ColumnDef::new("last_purchase_date", ColumnType::Date),
    ])
    .unwrap()
}

/// Customer `id` last purchased on day `id * 10`.
pub fn customer(id: i64) -> Row {
    vec![
        Value::Int(id),
        Value::Str(format!("user_{}", id)),
        Value::Date(id as i32 * 10),
    ]
}

pub fn customers(ids: std::ops::Range<i64>) -> Vec<Row> {
    ids.map(customer).collect()
}

pub fn config(dir: &Path, rows_per_file: usize) -> TableConfig {
    TableConfig {
        rows_per_file,
        commit_backoff_ms: 0,
        io_retry_delay_ms: 0,
        ..TableConfig::new(dir)
    }
}

/// Creates a table holding customers `0..rows`.
pub fn table_with_customers(dir: &Path, rows: i64, rows_per_file: usize) -> Table {
    let table = Table::create(config(dir, rows_per_file), customer_schema()).unwrap();
    table.append(customers(0..rows)).unwrap();
    table
}

/// Ids of all rows visible in the newest version, in scan order.
pub fn visible_ids(table: &Table) -> Vec<i64> {
    table
        .scan()
        .unwrap()
        .collect_rows()
        .unwrap()
        .into_iter()
        .map(|row| match row.values[0] {
            Value::Int(id) => id,
            ref other => panic!("unexpected id value {}", other),
        })
        .collect()
}

/// Number of `.dv` artifacts on disk.
pub fn artifact_count(dir: &Path) -> usize {
    match std::fs::read_dir(dir.join("dv")) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "dv"))
            .count(),
        Err(_) => 0,
    }
}
