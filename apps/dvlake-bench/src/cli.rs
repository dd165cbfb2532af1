use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Delete stale customers with a full rewrite, then with deletion vectors
    Compare {
        /// Number of synthetic customers
        #[arg(short, long, default_value_t = 1_000_000)]
        rows: usize,

        /// Rows per data file
        #[arg(long, default_value_t = 131_072)]
        rows_per_file: usize,

        /// Spread of last purchase dates, in days before today
        #[arg(short, long, default_value_t = 1000)]
        days: u32,

        /// Customers whose last purchase is older than this many days are deleted
        #[arg(long, default_value_t = 365)]
        cutoff_days: u32,

        /// Seed for the data generator
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Keep the deletion-vector table in this (new) directory for inspection
        #[arg(long)]
        keep_table: Option<PathBuf>,
    },

    /// Measure scan time as the share of tombstoned rows grows
    ScanOverhead {
        /// Number of synthetic customers
        #[arg(short, long, default_value_t = 500_000)]
        rows: usize,

        /// Rows per data file
        #[arg(long, default_value_t = 131_072)]
        rows_per_file: usize,

        /// Deleted shares to test, in percent (comma-separated)
        #[arg(long, default_value = "0,1,10,50")]
        percents: String,
    },

    /// Run small deletes from several threads against one table
    ConcurrentDeletes {
        /// Number of synthetic customers
        #[arg(short, long, default_value_t = 100_000)]
        rows: usize,

        /// Rows per data file
        #[arg(long, default_value_t = 10_000)]
        rows_per_file: usize,

        /// Writer thread counts to test (comma-separated)
        #[arg(long, default_value = "1,2,4,8")]
        threads: String,

        /// Deletes issued by each thread
        #[arg(long, default_value_t = 20)]
        deletes_per_thread: usize,
    },

    /// Run every benchmark with default settings
    All,
}
