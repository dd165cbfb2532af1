//! Delete planning: which files and which rows a predicate removes.
//!
//! Planning never writes anything. Files are first pruned with min/max
//! statistics; only files the statistics cannot decide are read, and then
//! only the columns the predicate references.

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use roaring::RoaringTreemap;

use crate::data_file::FileId;
use crate::deletion_vector::DeletionVectorStore;
use crate::error::DvError;
use crate::predicate::{Predicate, StatsVerdict};
use crate::version::{FileEntry, TableVersion};

/// What a delete does to one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileAction {
    /// Every live row matches; the file leaves the table.
    RemoveFile,
    /// Tombstone these positions in the file's deletion vector.
    MarkRows(RoaringTreemap),
    /// Rewrite the file without these positions (deletion vectors disabled).
    RewriteFile(RoaringTreemap),
}

impl FileAction {
    /// Rows this action newly hides, given the file's live row count.
    pub fn deleted_rows(&self, live_rows: u64) -> u64 {
        match self {
            FileAction::RemoveFile => live_rows,
            FileAction::MarkRows(positions) | FileAction::RewriteFile(positions) => {
                positions.len()
            }
        }
    }
}

/// Counters describing how a plan was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Files ruled out by statistics
    pub files_pruned: usize,
    /// Files matched entirely by statistics
    pub files_matched_by_stats: usize,
    /// Files whose rows were evaluated
    pub files_scanned: usize,
}

/// Per-file actions of one delete, valid against `read_version` only.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub read_version: u64,
    pub actions: BTreeMap<FileId, FileAction>,
    pub stats: PlanStats,
}

impl DeletePlan {
    /// `true` when the predicate hides no live row.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn touched_files(&self) -> BTreeSet<FileId> {
        self.actions.keys().copied().collect()
    }

    /// Rows the plan hides from readers of `version`.
    pub fn deleted_rows(&self, version: &TableVersion) -> u64 {
        self.actions
            .iter()
            .map(|(id, action)| {
                let live = version.files.get(id).map_or(0, FileEntry::live_rows);
                action.deleted_rows(live)
            })
            .sum()
    }
}

/// Outcome of evaluating one file.
enum FileVerdict {
    /// Ruled out by statistics
    Pruned,
    /// Matched entirely by statistics
    Whole,
    /// Rows evaluated; `None` when no live row matched
    Scanned(Option<FileAction>),
}

/// Builds delete plans against table versions.
#[derive(Debug)]
pub struct DeletePlanner<'a> {
    store: &'a DeletionVectorStore,
    deletion_vectors_enabled: bool,
}

impl<'a> DeletePlanner<'a> {
    pub fn new(store: &'a DeletionVectorStore, deletion_vectors_enabled: bool) -> Self {
        Self {
            store,
            deletion_vectors_enabled,
        }
    }

    /// Plans a delete of all rows matching `predicate` in `version`.
    ///
    /// # Arguments
    /// * `predicate` - Rows to delete; validated against the version's schema
    /// * `version` - Snapshot to plan against
    ///
    /// # Returns
    /// A plan containing only files with newly matched rows. Rows already
    /// tombstoned are never planned again.
    pub fn plan(&self, predicate: &Predicate, version: &TableVersion) -> Result<DeletePlan, DvError> {
        predicate.validate(&version.schema)?;
        let columns = predicate.columns();

        let entries: Vec<&FileEntry> = version.files.values().collect();

        #[cfg(feature = "parallel")]
        let verdicts: Vec<Result<FileVerdict, DvError>> = entries
            .par_iter()
            .map(|entry| self.evaluate_file(predicate, &columns, entry))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let verdicts: Vec<Result<FileVerdict, DvError>> = entries
            .iter()
            .map(|entry| self.evaluate_file(predicate, &columns, entry))
            .collect();

        let mut plan = DeletePlan {
            read_version: version.version,
            actions: BTreeMap::new(),
            stats: PlanStats::default(),
        };
        for (entry, verdict) in entries.iter().zip(verdicts) {
            match verdict? {
                FileVerdict::Pruned => plan.stats.files_pruned += 1,
                FileVerdict::Whole => {
                    plan.stats.files_matched_by_stats += 1;
                    plan.actions.insert(entry.file.id, FileAction::RemoveFile);
                }
                FileVerdict::Scanned(action) => {
                    plan.stats.files_scanned += 1;
                    if let Some(action) = action {
                        plan.actions.insert(entry.file.id, action);
                    }
                }
            }
        }

        tracing::debug!(
            version = version.version,
            predicate = %predicate,
            files = plan.actions.len(),
            pruned = plan.stats.files_pruned,
            whole = plan.stats.files_matched_by_stats,
            scanned = plan.stats.files_scanned,
            "planned delete"
        );
        Ok(plan)
    }

    fn evaluate_file(
        &self,
        predicate: &Predicate,
        columns: &[String],
        entry: &FileEntry,
    ) -> Result<FileVerdict, DvError> {
        let file = &entry.file;
        match predicate.verdict(file)? {
            StatsVerdict::None => return Ok(FileVerdict::Pruned),
            StatsVerdict::All if entry.live_rows() > 0 => return Ok(FileVerdict::Whole),
            StatsVerdict::All => return Ok(FileVerdict::Pruned),
            StatsVerdict::Some => {}
        }

        let existing = self
            .store
            .load_or_empty(file.id, entry.deletion_vector.as_ref())?;
        let batch = file.read(Some(columns))?;

        let mut matched = RoaringTreemap::new();
        for position in 0..file.row_count {
            if existing.contains(position) {
                continue;
            }
            if predicate.matches(&batch, position as usize)? {
                matched.insert(position);
            }
        }

        if matched.is_empty() {
            return Ok(FileVerdict::Scanned(None));
        }
        let action = if matched.len() + existing.cardinality() == file.row_count {
            FileAction::RemoveFile
        } else if self.deletion_vectors_enabled {
            FileAction::MarkRows(matched)
        } else {
            FileAction::RewriteFile(matched)
        };
        Ok(FileVerdict::Scanned(Some(action)))
    }
}
