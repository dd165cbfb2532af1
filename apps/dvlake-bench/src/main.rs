//! Delete benchmarks for deletion-vector tables.
//!
//! CLI tool comparing delete strategies on synthetic customer data:
//! - Full file rewrite versus deletion vectors
//! - Scan cost as tombstones accumulate
//! - Concurrent deletes and commit retries

mod benchmarks;
mod cli;
mod utils;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::utils::{parse_comma_separated, run_all_benchmarks};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            rows,
            rows_per_file,
            days,
            cutoff_days,
            seed,
            keep_table,
        } => benchmarks::compare::run_compare(
            rows,
            rows_per_file,
            days,
            cutoff_days,
            seed,
            keep_table.as_deref(),
        ),
        Commands::ScanOverhead {
            rows,
            rows_per_file,
            percents,
        } => {
            let percents = parse_comma_separated(&percents)?;
            benchmarks::scan_overhead::run_scan_overhead(rows, rows_per_file, &percents)
        }
        Commands::ConcurrentDeletes {
            rows,
            rows_per_file,
            threads,
            deletes_per_thread,
        } => {
            let threads = parse_comma_separated(&threads)?;
            benchmarks::concurrent_deletes::run_concurrent_deletes(
                rows,
                rows_per_file,
                &threads,
                deletes_per_thread,
            )
        }
        Commands::All => run_all_benchmarks(),
    }
}
