//! Read-time filtering of tombstoned rows.
//!
//! A [`FileScan`] yields the surviving rows of one data file in position
//! order. The deletion vector is applied as a position mask, independent of
//! any row predicate, so masking and filtering commute.

use std::sync::{Arc, OnceLock};

use crate::data_file::{ColumnBatch, DataFile, RowAddress};
use crate::deletion_vector::DeletionVector;
use crate::error::DvError;
use crate::predicate::Predicate;
use crate::schema::Row;

/// A row that survived deletion-vector masking and filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    pub address: RowAddress,
    pub values: Row,
}

/// Removes positions present in `dv` from a position stream.
///
/// Usable at any stage of a filter pipeline.
pub fn apply_deletion_mask<'a, I>(
    positions: I,
    dv: Option<&'a DeletionVector>,
) -> impl Iterator<Item = u64> + 'a
where
    I: Iterator<Item = u64> + 'a,
{
    positions.filter(move |p| dv.map_or(true, |dv| !dv.contains(*p)))
}

/// Lazy, restartable scan of one data file.
#[derive(Debug)]
pub struct FileScan {
    file: DataFile,
    deletion_vector: Option<Arc<DeletionVector>>,
    projection: Option<Vec<String>>,
    filter: Option<Predicate>,
    batch: OnceLock<Arc<ColumnBatch>>,
}

/// Starts a scan of `file`, masking positions in `deletion_vector`.
pub fn scan(file: &DataFile, deletion_vector: Option<Arc<DeletionVector>>) -> FileScan {
    FileScan {
        file: file.clone(),
        deletion_vector,
        projection: None,
        filter: None,
        batch: OnceLock::new(),
    }
}

impl FileScan {
    /// Restricts output to the named columns, in the given order.
    pub fn with_projection(mut self, columns: Vec<String>) -> Self {
        self.projection = Some(columns);
        self.batch = OnceLock::new();
        self
    }

    /// Keeps only rows matching `filter` in addition to the deletion mask.
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self.batch = OnceLock::new();
        self
    }

    pub fn file(&self) -> &DataFile {
        &self.file
    }

    /// Columns to read: projection plus filter columns, or everything.
    fn read_set(&self) -> Option<Vec<String>> {
        let projection = self.projection.as_ref()?;
        let mut columns = projection.clone();
        if let Some(filter) = &self.filter {
            for column in filter.columns() {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Some(columns)
    }

    /// Loads column data on first use and keeps it for restarts.
    fn batch(&self) -> Result<Arc<ColumnBatch>, DvError> {
        if let Some(batch) = self.batch.get() {
            return Ok(batch.clone());
        }
        let read_set = self.read_set();
        let batch = Arc::new(self.file.read(read_set.as_deref())?);
        let _ = self.batch.set(batch.clone());
        Ok(batch)
    }

    fn check_deletion_vector(&self) -> Result<(), DvError> {
        let Some(dv) = &self.deletion_vector else {
            return Ok(());
        };
        if dv.file_id != self.file.id {
            return Err(DvError::DataCorruption(format!(
                "deletion vector of file {} attached to file {}",
                dv.file_id, self.file.id
            )));
        }
        if let Some(max) = dv.bitmap().max() {
            self.file.check_position(max)?;
        }
        Ok(())
    }

    /// Positions that survive the deletion mask and the filter, ascending.
    pub fn positions(&self) -> Result<Vec<u64>, DvError> {
        self.check_deletion_vector()?;
        let masked = apply_deletion_mask(0..self.file.row_count, self.deletion_vector.as_deref());

        match &self.filter {
            None => Ok(masked.collect()),
            Some(filter) => {
                let batch = self.batch()?;
                let mut out = Vec::new();
                for position in masked {
                    if filter.matches(&batch, position as usize)? {
                        out.push(position);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Number of surviving rows.
    pub fn count(&self) -> Result<u64, DvError> {
        if self.filter.is_none() {
            self.check_deletion_vector()?;
            let deleted = self
                .deletion_vector
                .as_ref()
                .map_or(0, |dv| dv.cardinality());
            return Ok(self.file.row_count - deleted);
        }
        Ok(self.positions()?.len() as u64)
    }

    /// Iterates surviving rows. Each call starts over from the first row.
    pub fn rows(&self) -> Result<SurvivingRows, DvError> {
        let positions = self.positions()?;
        let batch = self.batch()?;
        let output = match &self.projection {
            Some(projection) => projection
                .iter()
                .map(|name| {
                    batch
                        .columns
                        .iter()
                        .position(|(n, _)| n == name)
                        .ok_or_else(|| DvError::ColumnNotFound {
                            column: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => (0..batch.columns.len()).collect(),
        };

        Ok(SurvivingRows {
            file_id: self.file.id,
            batch,
            output,
            positions: positions.into_iter(),
        })
    }
}

/// Iterator over the surviving rows of one file.
#[derive(Debug)]
pub struct SurvivingRows {
    file_id: u64,
    batch: Arc<ColumnBatch>,
    output: Vec<usize>,
    positions: std::vec::IntoIter<u64>,
}

impl Iterator for SurvivingRows {
    type Item = ScannedRow;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.positions.next()?;
        let values = self
            .output
            .iter()
            .map(|&i| self.batch.columns[i].1.value(position as usize))
            .collect();
        Some(ScannedRow {
            address: RowAddress::new(self.file_id, position),
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

impl ExactSizeIterator for SurvivingRows {}

/// Scan over every live file of a table version, in file id order.
#[derive(Debug)]
pub struct TableScan {
    files: Vec<FileScan>,
}

impl TableScan {
    pub fn new(files: Vec<FileScan>) -> Self {
        Self { files }
    }

    /// Iterates rows file by file; a failing file ends the iteration with
    /// its error.
    pub fn iter(&self) -> TableRows<'_> {
        TableRows {
            files: self.files.iter(),
            current: None,
            failed: false,
        }
    }

    /// Collects every surviving row.
    pub fn collect_rows(&self) -> Result<Vec<ScannedRow>, DvError> {
        self.iter().collect()
    }

    /// Counts surviving rows without materializing them when possible.
    pub fn count(&self) -> Result<u64, DvError> {
        self.files.iter().map(|f| f.count()).sum()
    }
}

/// Iterator returned by [`TableScan::iter`].
#[derive(Debug)]
pub struct TableRows<'a> {
    files: std::slice::Iter<'a, FileScan>,
    current: Option<SurvivingRows>,
    failed: bool,
}

impl Iterator for TableRows<'_> {
    type Item = Result<ScannedRow, DvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(rows) = &mut self.current {
                if let Some(row) = rows.next() {
                    return Some(Ok(row));
                }
            }
            let file = self.files.next()?;
            match file.rows() {
                Ok(rows) => self.current = Some(rows),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
