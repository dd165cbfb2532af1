//! CLI tool for table maintenance and inspection.
//!
//! Provides commands for:
//! - Inspecting the newest version and its deletion vectors
//! - Listing version history
//! - Triggering compaction of one file or all eligible files

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dvlake_core::{Operation, Table, TableConfig, TableVersion};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Table directory
    #[arg(short, long, default_value = "./data")]
    table: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show files, row counts and deletion vectors of the newest version
    Inspect {
        /// Print the version manifest as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// List every version with the operation that produced it
    History,

    /// Rewrite files without their tombstoned rows
    Compact {
        /// Compact this file only
        #[arg(long, conflicts_with = "all")]
        file_id: Option<u64>,

        /// Compact every file whose deleted ratio reaches the threshold
        #[arg(long)]
        all: bool,

        /// Deleted ratio (0.0-1.0) required with --all
        #[arg(long, default_value_t = 0.0)]
        min_deleted_ratio: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = TableConfig::new(&cli.table);

    match cli.command {
        Commands::Inspect { json } => {
            let table = open(config)?;
            let version = table.current();
            if json {
                let manifest = dvlake_core::version::Manifest::from_version(&version, &cli.table);
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                print_inspection(&table, &version)?;
            }
        }
        Commands::History => {
            let table = open(config)?;
            for version in table.history()? {
                println!(
                    "{:>6}  {:>13}  {:>10} live  {}",
                    version.version,
                    version.timestamp_ms,
                    version.live_rows(),
                    describe(&version.operation)
                );
            }
        }
        Commands::Compact {
            file_id,
            all,
            min_deleted_ratio,
        } => {
            config.compaction_min_deleted_ratio = min_deleted_ratio;
            let table = open(config)?;
            match (file_id, all) {
                (Some(file_id), _) => match table.compact(file_id)? {
                    Some(file) => println!(
                        "Compacted file {} into file {} ({} rows)",
                        file_id, file.id, file.row_count
                    ),
                    None => println!("File {} had no surviving rows and was dropped", file_id),
                },
                (None, true) => {
                    let report = table.compact_all_eligible()?;
                    match report.version {
                        Some(version) => println!(
                            "Compacted {} files at version {}, dropped {} rows ({} races retried)",
                            report.files.len(),
                            version,
                            report.rows_dropped(),
                            report.races
                        ),
                        None => println!("No files eligible for compaction"),
                    }
                }
                (None, false) => bail!("pass --file-id <ID> or --all"),
            }
        }
    }
    Ok(())
}

fn open(config: TableConfig) -> Result<Table> {
    let dir = config.data_dir.display().to_string();
    tracing::debug!(table = %dir, "opening table");
    Table::open(config).with_context(|| format!("failed to open table at {}", dir))
}

fn print_inspection(table: &Table, version: &TableVersion) -> Result<()> {
    println!("Table: {}", table.config().data_dir.display());
    println!("Version: {}", version.version);
    println!(
        "Columns: {}",
        version
            .schema
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ty))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Files: {} ({} with deletion vectors)",
        version.files.len(),
        version.files_with_deletion_vectors()
    );
    println!(
        "Rows: {} physical, {} live",
        version.physical_rows(),
        version.live_rows()
    );
    println!();
    println!("{:>8}  {:>10}  {:>10}  {:>8}  {:>6}", "file", "rows", "deleted", "ratio", "gen");
    for entry in version.files.values() {
        let generation = entry
            .deletion_vector
            .as_ref()
            .map(|dv| dv.generation.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:>10}  {:>10}  {:>7.1}%  {:>6}",
            entry.file.id,
            entry.file.row_count,
            entry.deleted_rows(),
            entry.deleted_ratio() * 100.0,
            generation
        );
        if entry.deletion_vector.is_some() && table.deletion_vector(entry.file.id).is_err() {
            println!("          deletion vector failed validation");
        }
    }
    Ok(())
}

fn describe(operation: &Operation) -> String {
    match operation {
        Operation::Create => "create".to_string(),
        Operation::Append { files } => format!("append {} files", files.len()),
        Operation::Delete {
            predicate,
            deleted_rows,
        } => format!("delete {} rows where {}", deleted_rows, predicate),
        Operation::Compact { removed, added } => {
            format!("compact {:?} into {:?}", removed, added)
        }
    }
}
