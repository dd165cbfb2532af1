//! Row tombstoning for an immutable columnar table.
//!
//! Deletes never rewrite data files. Matching rows are recorded in per-file
//! deletion vectors (roaring bitmaps) referenced from immutable table
//! versions, and masked out at read time. Compaction rewrites files on
//! request to drop tombstoned rows for good.

pub mod compaction;
pub mod config;
pub mod data_file;
pub mod deletion_vector;
pub mod error;
pub mod io_utils;
pub mod planner;
pub mod predicate;
pub mod scan;
pub mod schema;
pub mod table;
pub mod version;

pub use compaction::{CompactedFile, CompactionCoordinator, CompactionReport};
pub use config::TableConfig;
pub use data_file::{DataFile, FileId, RowAddress};
pub use deletion_vector::{DeletionVector, DeletionVectorHandle, DeletionVectorStore};
pub use error::DvError;
pub use planner::{DeletePlan, DeletePlanner, FileAction};
pub use predicate::{CompareOp, Predicate};
pub use scan::{FileScan, ScannedRow, TableScan};
pub use schema::{ColumnDef, ColumnType, Row, Schema, Value};
pub use table::{DeleteOutcome, Table};
pub use version::{FileEntry, Operation, TableVersion};
