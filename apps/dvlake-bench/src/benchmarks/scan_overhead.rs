use std::hint::black_box;
use std::time::Instant;

use anyhow::Result;
use dvlake_core::{Predicate, Value};

use crate::utils::{generate_customers, temp_table, today};

const SCAN_ITERATIONS: u32 = 5;

/// Run scan timing with growing tombstone share
pub fn run_scan_overhead(rows: usize, rows_per_file: usize, percents: &[usize]) -> Result<()> {
    println!("Running scan overhead test...");
    println!("Rows: {}, rows per file: {}", rows, rows_per_file);

    // Purchase dates spread over 100 days make each day one percent of rows.
    let data = generate_customers(rows, 100, 7);

    let mut baseline = None;
    for &percent in percents {
        let table = temp_table(data.clone(), rows_per_file, true)?;
        if percent > 0 {
            let cutoff = Value::Date(today() - 99 + percent as i32);
            table
                .table
                .delete(&Predicate::lt("last_purchase_date", cutoff))?;
        }

        let start = Instant::now();
        let mut live = 0;
        for _ in 0..SCAN_ITERATIONS {
            live = black_box(table.table.scan()?.collect_rows()?.len());
        }
        let per_scan = start.elapsed() / SCAN_ITERATIONS;
        let base = *baseline.get_or_insert(per_scan);

        println!(
            "  {:>3}% deleted: {:>8} live rows, {:?} per scan ({:+.1}% vs clean)",
            percent,
            live,
            per_scan,
            (per_scan.as_secs_f64() / base.as_secs_f64().max(f64::EPSILON) - 1.0) * 100.0
        );
    }
    Ok(())
}
