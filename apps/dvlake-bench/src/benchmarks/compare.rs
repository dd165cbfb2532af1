use std::path::Path;
use std::time::Instant;

use anyhow::{ensure, Result};
use dvlake_core::{Predicate, Table, Value};

use crate::utils::{create_table, generate_customers, temp_table, today};

/// Run the rewrite versus deletion-vector delete comparison
pub fn run_compare(
    rows: usize,
    rows_per_file: usize,
    days: u32,
    cutoff_days: u32,
    seed: u64,
    keep_table: Option<&Path>,
) -> Result<()> {
    ensure!(rows > 0, "rows must be greater than 0");
    println!("Comparing delete strategies...");
    println!(
        "Rows: {}, rows per file: {}, purchase spread: {} days, cutoff: {} days",
        rows, rows_per_file, days, cutoff_days
    );

    let data = generate_customers(rows, days, seed);
    let cutoff = Value::Date(today() - cutoff_days as i32);
    let predicate = Predicate::lt("last_purchase_date", cutoff);
    println!("Predicate: {}", predicate);

    let legacy = temp_table(data.clone(), rows_per_file, false)?;
    let start = Instant::now();
    let legacy_outcome = legacy.table.delete(&predicate)?;
    let legacy_time = start.elapsed();
    tracing::debug!(
        version = legacy_outcome.version,
        rewritten = legacy_outcome.files_rewritten,
        elapsed_ms = legacy_time.as_millis() as u64,
        "rewrite delete finished"
    );

    let temp;
    let kept;
    let dv: &Table = match keep_table {
        Some(dir) => {
            kept = create_table(dir, data, rows_per_file, true)?;
            &kept
        }
        None => {
            temp = temp_table(data, rows_per_file, true)?;
            &temp.table
        }
    };
    let start = Instant::now();
    let dv_outcome = dv.delete(&predicate)?;
    let dv_time = start.elapsed();
    tracing::debug!(
        version = dv_outcome.version,
        marked = dv_outcome.files_marked,
        elapsed_ms = dv_time.as_millis() as u64,
        "deletion vector delete finished"
    );

    ensure!(
        legacy_outcome.deleted_rows == dv_outcome.deleted_rows,
        "strategies disagree: rewrite deleted {} rows, deletion vectors {}",
        legacy_outcome.deleted_rows,
        dv_outcome.deleted_rows
    );
    let legacy_live = legacy.table.scan()?.count()?;
    let dv_live = dv.scan()?.count()?;
    ensure!(
        legacy_live == dv_live,
        "strategies disagree on surviving rows: {} vs {}",
        legacy_live,
        dv_live
    );

    println!("Results:");
    println!("  Rows deleted: {}", dv_outcome.deleted_rows);
    println!("  Rows remaining: {}", dv_live);
    println!(
        "  Full rewrite:      {:?} ({} files rewritten, {} removed)",
        legacy_time, legacy_outcome.files_rewritten, legacy_outcome.files_removed
    );
    println!(
        "  Deletion vectors:  {:?} ({} files marked, {} removed)",
        dv_time, dv_outcome.files_marked, dv_outcome.files_removed
    );

    let dv_secs = dv_time.as_secs_f64();
    if dv_secs > 0.0 {
        println!(
            "  Speedup: {:.2}x",
            legacy_time.as_secs_f64() / dv_secs
        );
    }
    if let Some(dir) = keep_table {
        println!("  Deletion-vector table kept at {}", dir.display());
    }
    Ok(())
}
