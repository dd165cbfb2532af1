//! Builds immutable data files from rows.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::DvError;
use crate::io_utils::{classify_io_error, publish_exclusive};
use crate::schema::{Row, Schema};

use super::codec::encode;
use super::{data_file_name, ColumnData, DataFile, FileId};

/// Upper bound on id probing when the preferred file id is already taken.
const MAX_ID_PROBES: u64 = 1024;

/// Accumulates rows column by column and publishes them as one data file.
///
/// Files are never overwritten: when another writer already published the
/// preferred id, the next free id is used instead.
#[derive(Debug)]
pub struct DataFileWriter {
    id: FileId,
    dir: PathBuf,
    schema: Schema,
    columns: Vec<ColumnData>,
    row_count: u64,
}

impl DataFileWriter {
    /// Creates a writer for file `id` inside `dir`.
    pub fn new(id: FileId, dir: impl Into<PathBuf>, schema: &Schema) -> Self {
        let columns = schema
            .columns
            .iter()
            .map(|c| ColumnData::with_capacity(c.ty, 0))
            .collect();
        Self {
            id,
            dir: dir.into(),
            schema: schema.clone(),
            columns,
            row_count: 0,
        }
    }

    /// Appends one row after checking it against the schema.
    pub fn push_row(&mut self, row: Row) -> Result<(), DvError> {
        self.schema.check_row(&row)?;
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value)?;
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Encodes, writes and syncs the file, returning its metadata.
    ///
    /// # Returns
    /// `Result<DataFile, DvError>` with statistics for every column. The
    /// returned id may be larger than the requested one.
    pub fn finish(self) -> Result<DataFile, DvError> {
        let named: Vec<(String, ColumnData)> = self
            .schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .zip(self.columns)
            .collect();

        let mut stats = BTreeMap::new();
        for (name, data) in &named {
            if let Some(column_stats) = data.stats() {
                stats.insert(name.clone(), column_stats);
            }
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;

        let mut id = self.id;
        let (path, size_bytes) = loop {
            let bytes = encode(id, self.row_count, &named)?;
            let path = self.dir.join(data_file_name(id));
            if publish_exclusive(&path, &bytes)? {
                break (path, bytes.len() as u64);
            }
            if id - self.id + 1 >= MAX_ID_PROBES {
                return Err(DvError::IoError(format!(
                    "no free data file id in {} after {} probes",
                    self.dir.display(),
                    MAX_ID_PROBES
                )));
            }
            id += 1;
        };

        tracing::debug!(
            file_id = id,
            rows = self.row_count,
            bytes = size_bytes,
            "wrote data file"
        );

        Ok(DataFile {
            id,
            path,
            row_count: self.row_count,
            stats,
            size_bytes,
        })
    }
}
