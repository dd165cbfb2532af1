//! Immutable table versions and their on-disk manifests.
//!
//! Every commit produces a new [`TableVersion`]. Versions are never edited;
//! readers holding an `Arc<TableVersion>` keep a consistent snapshot for as
//! long as they need it.

mod log;
mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::data_file::{DataFile, FileId};
use crate::deletion_vector::DeletionVectorHandle;
use crate::error::DvError;
use crate::schema::Schema;

pub use log::{CommitOutcome, VersionLog};
pub use manifest::{manifest_name, Manifest, ManifestFile};

/// A live data file and its current deletion vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub file: Arc<DataFile>,
    pub deletion_vector: Option<DeletionVectorHandle>,
}

impl FileEntry {
    pub fn new(file: DataFile) -> Self {
        Self {
            file: Arc::new(file),
            deletion_vector: None,
        }
    }

    /// Rows tombstoned by the current deletion vector.
    pub fn deleted_rows(&self) -> u64 {
        self.deletion_vector.as_ref().map_or(0, |dv| dv.cardinality)
    }

    /// Rows visible to readers.
    pub fn live_rows(&self) -> u64 {
        self.file.row_count - self.deleted_rows()
    }

    /// Fraction of physical rows that are tombstoned.
    pub fn deleted_ratio(&self) -> f64 {
        if self.file.row_count == 0 {
            return 0.0;
        }
        self.deleted_rows() as f64 / self.file.row_count as f64
    }
}

/// What produced a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Create,
    Append { files: Vec<FileId> },
    Delete { predicate: String, deleted_rows: u64 },
    Compact { removed: Vec<FileId>, added: Vec<FileId> },
}

/// Immutable snapshot of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableVersion {
    /// Version number, starting at 0 for an empty table
    pub version: u64,
    /// Version this one was derived from
    pub parent: Option<u64>,
    pub schema: Schema,
    /// Live files keyed by id
    pub files: BTreeMap<FileId, FileEntry>,
    /// Next unused file id
    pub next_file_id: FileId,
    /// Files added, removed or re-tombstoned by the commit that produced this version
    pub touched: BTreeSet<FileId>,
    pub operation: Operation,
    /// Commit time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl TableVersion {
    /// Version 0 of a new, empty table.
    pub fn initial(schema: Schema) -> Self {
        Self {
            version: 0,
            parent: None,
            schema,
            files: BTreeMap::new(),
            next_file_id: 1,
            touched: BTreeSet::new(),
            operation: Operation::Create,
            timestamp_ms: now_ms(),
        }
    }

    /// Starts the successor of this version.
    ///
    /// The returned builder copies the file map; nothing about `self` changes.
    pub fn successor(&self, operation: Operation) -> VersionBuilder {
        VersionBuilder {
            next: TableVersion {
                version: self.version + 1,
                parent: Some(self.version),
                schema: self.schema.clone(),
                files: self.files.clone(),
                next_file_id: self.next_file_id,
                touched: BTreeSet::new(),
                operation,
                timestamp_ms: now_ms(),
            },
        }
    }

    /// Looks up a live file.
    ///
    /// # Returns
    /// `Err(DvError::FileNotFound)` if the file is not part of this version.
    pub fn file(&self, file_id: FileId) -> Result<&FileEntry, DvError> {
        self.files.get(&file_id).ok_or(DvError::FileNotFound {
            file_id,
            version: self.version,
        })
    }

    /// Physical rows across all live files.
    pub fn physical_rows(&self) -> u64 {
        self.files.values().map(|e| e.file.row_count).sum()
    }

    /// Rows visible to readers.
    pub fn live_rows(&self) -> u64 {
        self.files.values().map(FileEntry::live_rows).sum()
    }

    /// Number of files carrying a deletion vector.
    pub fn files_with_deletion_vectors(&self) -> usize {
        self.files
            .values()
            .filter(|e| e.deletion_vector.is_some())
            .count()
    }
}

/// Mutable staging area for the next version.
#[derive(Debug)]
pub struct VersionBuilder {
    next: TableVersion,
}

impl VersionBuilder {
    /// Adds a newly written file, keeping `next_file_id` above its id.
    pub fn add_file(&mut self, file: DataFile) {
        self.next.touched.insert(file.id);
        self.next.next_file_id = self.next.next_file_id.max(file.id + 1);
        self.next.files.insert(file.id, FileEntry::new(file));
    }

    pub fn remove_file(&mut self, file_id: FileId) -> Option<FileEntry> {
        self.next.touched.insert(file_id);
        self.next.files.remove(&file_id)
    }

    /// Points a live file at a new deletion vector generation.
    pub fn set_deletion_vector(
        &mut self,
        file_id: FileId,
        handle: DeletionVectorHandle,
    ) -> Result<(), DvError> {
        let version = self.next.version;
        let entry = self
            .next
            .files
            .get_mut(&file_id)
            .ok_or(DvError::FileNotFound { file_id, version })?;
        self.next.touched.insert(file_id);
        entry.deletion_vector = Some(handle);
        Ok(())
    }

    pub fn build(self) -> TableVersion {
        self.next
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
