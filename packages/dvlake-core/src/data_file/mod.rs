//! Immutable columnar data files and row addressing.
//!
//! A data file is written once by [`DataFileWriter`] and never modified.
//! Rows inside a file are addressed by their ordinal position, which stays
//! stable for as long as the file is part of the table.

mod codec;
mod column;
mod writer;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DvError;
use crate::schema::Value;

pub use codec::{read_columns, read_header, ChunkMeta, FileHeader};
pub use column::{ColumnBatch, ColumnData};
pub use writer::DataFileWriter;

/// Unique identifier of a data file within a table.
pub type FileId = u64;

/// Stable address of a row: owning file plus ordinal position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowAddress {
    pub file_id: FileId,
    pub position: u64,
}

impl RowAddress {
    pub fn new(file_id: FileId, position: u64) -> Self {
        Self { file_id, position }
    }
}

impl fmt::Display for RowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.position)
    }
}

/// Min/max statistics of one column in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub min: Value,
    pub max: Value,
}

/// Metadata of an immutable data file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    /// Unique file id
    pub id: FileId,
    /// Absolute path of the file on disk
    pub path: PathBuf,
    /// Number of physical rows in the file
    pub row_count: u64,
    /// Per-column min/max statistics, keyed by column name
    pub stats: BTreeMap<String, ColumnStats>,
    /// File size in bytes
    pub size_bytes: u64,
}

impl DataFile {
    /// Returns statistics for a column, if the writer recorded any.
    pub fn column_stats(&self, column: &str) -> Option<&ColumnStats> {
        self.stats.get(column)
    }

    /// Checks that `position` addresses a row of this file.
    pub fn check_position(&self, position: u64) -> Result<(), DvError> {
        if position >= self.row_count {
            return Err(DvError::OutOfRange {
                file_id: self.id,
                position,
                row_count: self.row_count,
            });
        }
        Ok(())
    }

    /// Reads the named columns (all columns when `columns` is `None`).
    pub fn read(&self, columns: Option<&[String]>) -> Result<ColumnBatch, DvError> {
        read_columns(&self.path, self.id, self.row_count, columns)
    }
}

/// File name of a data file inside the table's `data/` directory.
pub fn data_file_name(id: FileId) -> String {
    format!("{:016x}.dvf", id)
}
