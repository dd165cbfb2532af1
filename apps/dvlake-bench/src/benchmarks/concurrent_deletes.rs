use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, ensure, Result};
use dvlake_core::{Predicate, Value};

use crate::utils::{generate_customers, temp_table};

/// Caller-level attempts per delete when the table reports a retryable error
const MAX_CALLER_ATTEMPTS: u32 = 3;

/// Run concurrent single-row deletes and report retries
pub fn run_concurrent_deletes(
    rows: usize,
    rows_per_file: usize,
    thread_counts: &[usize],
    deletes_per_thread: usize,
) -> Result<()> {
    ensure!(rows > 0, "rows must be greater than 0");
    println!("Running concurrent delete test...");
    println!(
        "Rows: {}, rows per file: {}, deletes per thread: {}",
        rows, rows_per_file, deletes_per_thread
    );

    for &threads in thread_counts {
        let data = generate_customers(rows, 1000, 11);
        let table = Arc::new(temp_table(data, rows_per_file, true)?);

        let start = Instant::now();
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || -> Result<(u32, u32)> {
                    let mut retries = 0;
                    let mut rebases = 0;
                    for i in 0..deletes_per_thread {
                        // Spread ids so threads hit different files.
                        let id = (t + i * threads) * rows_per_file / 2 % rows + 1;
                        let predicate = Predicate::eq("customer_id", Value::Int(id as i64));
                        let mut attempt = 1;
                        let outcome = loop {
                            match table.table.delete(&predicate) {
                                Ok(outcome) => break outcome,
                                Err(err) if err.is_retryable() && attempt < MAX_CALLER_ATTEMPTS => {
                                    tracing::warn!(thread = t, id, attempt, "retrying delete: {}", err);
                                    retries += 1;
                                    attempt += 1;
                                }
                                Err(err) => return Err(err.into()),
                            }
                        };
                        retries += outcome.retries;
                        rebases += outcome.rebases;
                    }
                    Ok((retries, rebases))
                })
            })
            .collect();

        let mut retries = 0;
        let mut rebases = 0;
        for handle in handles {
            let (r, b) = handle
                .join()
                .map_err(|_| anyhow!("delete thread panicked"))??;
            retries += r;
            rebases += b;
        }
        let elapsed = start.elapsed();
        let total = threads * deletes_per_thread;

        println!(
            "  {} threads: {} deletes in {:?} ({:.0} deletes/sec), {} replans, {} rebases",
            threads,
            total,
            elapsed,
            total as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            retries,
            rebases
        );
    }
    Ok(())
}
