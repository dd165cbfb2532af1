//! Table error types.

use thiserror::Error;

/// Table operation errors.
#[derive(Error, Debug, Clone)]
pub enum DvError {
    /// Row position beyond the owning file's row count
    #[error("Position {position} out of range for file {file_id} (row count {row_count})")]
    OutOfRange {
        file_id: u64,
        position: u64,
        row_count: u64,
    },

    /// Persisted deletion vector failed validation on load
    #[error("Corrupt deletion vector for file {file_id} generation {generation}: {reason}")]
    CorruptBitmap {
        file_id: u64,
        generation: u64,
        reason: String,
    },

    /// Compare-and-swap on the version pointer failed and retries are exhausted
    #[error(
        "Commit conflict: read version {read_version}, current version {current_version} after {attempts} attempts"
    )]
    CommitConflict {
        read_version: u64,
        current_version: u64,
        attempts: u32,
    },

    /// Compaction observed a file that is being deleted from concurrently
    #[error("Compaction race on file {file_id} at version {version}")]
    CompactionRace { file_id: u64, version: u64 },

    /// Data file is not part of the table version
    #[error("File {file_id} not found in version {version}")]
    FileNotFound { file_id: u64, version: u64 },

    /// Deletion vector state for the file has been retired by compaction
    #[error("File {file_id} has been retired")]
    FileRetired { file_id: u64 },

    /// Column not found in schema or data file
    #[error("Column '{column}' not found")]
    ColumnNotFound { column: String },

    /// Type mismatch error
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Rows or files do not match the table schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Table directory already holds a version log
    #[error("Table already exists at '{0}'")]
    TableAlreadyExists(String),

    /// Configuration value rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    /// Disk full error during persistence
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIoError(String),
}

impl DvError {
    /// Returns `true` if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DvError::CommitConflict { .. }
                | DvError::CompactionRace { .. }
                | DvError::TransientIoError(_)
        )
    }
}
