use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use dvlake_core::{ColumnDef, ColumnType, Row, Schema, Table, TableConfig, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// Schema of the synthetic customer table.
pub fn customer_schema() -> Result<Schema> {
    Ok(Schema::new(vec![
        ColumnDef::new("customer_id", ColumnType::Int64),
        ColumnDef::new("name", ColumnType::Utf8),
        ColumnDef::new("last_purchase_date", ColumnType::Date),
        ColumnDef::new("purchase_count", ColumnType::Int64),
    ])?)
}

/// Today as days since the Unix epoch.
pub fn today() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() / 86_400) as i32)
        .unwrap_or(0)
}

/// Generates `rows` customers whose last purchase falls within the past `days` days.
pub fn generate_customers(rows: usize, days: u32, seed: u64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    let today = today();
    (0..rows)
        .map(|i| {
            let id = i as i64 + 1;
            vec![
                Value::Int(id),
                Value::Str(format!("user_{}", id)),
                Value::Date(today - rng.gen_range(0..days.max(1)) as i32),
                Value::Int(rng.gen_range(1..100)),
            ]
        })
        .collect()
}

/// A table in a temporary directory, removed on drop.
pub struct TempTable {
    pub table: Table,
    _dir: TempDir,
}

/// Creates a temporary table holding `rows`.
pub fn temp_table(rows: Vec<Row>, rows_per_file: usize, deletion_vectors: bool) -> Result<TempTable> {
    let dir = TempDir::new().context("failed to create temporary table directory")?;
    let table = create_table(dir.path(), rows, rows_per_file, deletion_vectors)?;
    Ok(TempTable { table, _dir: dir })
}

/// Creates a customer table at `dir` holding `rows`.
pub fn create_table(
    dir: &Path,
    rows: Vec<Row>,
    rows_per_file: usize,
    deletion_vectors: bool,
) -> Result<Table> {
    let config = TableConfig {
        rows_per_file,
        deletion_vectors_enabled: deletion_vectors,
        ..TableConfig::new(dir)
    };
    let table = Table::create(config, customer_schema()?)
        .with_context(|| format!("failed to create table at {}", dir.display()))?;
    table.append(rows)?;
    Ok(table)
}

/// Parse comma-separated string into vector of usize
pub fn parse_comma_separated(input: &str) -> Result<Vec<usize>> {
    input
        .split(',')
        .map(|s| {
            s.trim()
                .parse()
                .with_context(|| format!("invalid value '{}': must be a positive integer", s))
        })
        .collect()
}

/// Run all benchmarks with their default settings
pub fn run_all_benchmarks() -> Result<()> {
    use crate::benchmarks;

    println!("Running all delete benchmarks...");
    println!("{}", "=".repeat(60));

    benchmarks::compare::run_compare(200_000, 32_768, 1000, 365, 42, None)?;
    println!("{}", "=".repeat(60));
    benchmarks::scan_overhead::run_scan_overhead(200_000, 32_768, &[0, 1, 10, 50])?;
    println!("{}", "=".repeat(60));
    benchmarks::concurrent_deletes::run_concurrent_deletes(50_000, 5_000, &[1, 2, 4], 10)?;

    println!("{}", "=".repeat(60));
    println!("All benchmarks completed.");
    Ok(())
}
