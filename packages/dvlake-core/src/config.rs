//! Table configuration.

use std::path::PathBuf;

use crate::error::DvError;

/// Table configuration.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Table directory holding data files, deletion vectors and manifests
    pub data_dir: PathBuf,
    /// Record deletes as deletion vectors instead of rewriting data files
    pub deletion_vectors_enabled: bool,
    /// Maximum replans after a commit conflict before giving up
    pub max_commit_retries: u32,
    /// Maximum rebases onto concurrent commits on other files before giving up
    pub max_commit_rebases: u32,
    /// Base backoff between commit retries in milliseconds (scaled by attempt)
    pub commit_backoff_ms: u64,
    /// Maximum rows per data file written by appends and rewrites
    pub rows_per_file: usize,
    /// Deleted ratio (0.0-1.0) at which a file is eligible for compaction
    pub compaction_min_deleted_ratio: f64,
    /// Maximum retry attempts for transient I/O errors
    pub io_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub io_retry_delay_ms: u64,
}

impl TableConfig {
    /// Creates a default configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), DvError> {
        if self.rows_per_file == 0 {
            return Err(DvError::InvalidConfig(
                "rows_per_file must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction_min_deleted_ratio) {
            return Err(DvError::InvalidConfig(format!(
                "compaction_min_deleted_ratio must be within 0.0..=1.0, got {}",
                self.compaction_min_deleted_ratio
            )));
        }
        Ok(())
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            deletion_vectors_enabled: true,
            max_commit_retries: 10,
            max_commit_rebases: 100,
            commit_backoff_ms: 2,
            rows_per_file: 131_072,
            compaction_min_deleted_ratio: 0.0,
            io_max_retries: 3,     // Default retry attempts
            io_retry_delay_ms: 100, // 100ms delay between retries
        }
    }
}
