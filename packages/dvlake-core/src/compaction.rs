//! Compaction: physically drop tombstoned rows and retire deletion vectors.
//!
//! Compaction only runs when asked to. It reads surviving rows through the
//! normal scan path, writes replacement files, commits them in place of the
//! originals and then retires the originals' deletion vector state.

use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::data_file::{DataFile, DataFileWriter, FileId};
use crate::error::DvError;
use crate::table::{backoff, check_rebases, Table};
use crate::version::{CommitOutcome, Operation, TableVersion};

/// One file replaced by compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactedFile {
    pub old_file: FileId,
    /// Replacement, or `None` if no row survived
    pub replacement: Option<DataFile>,
    pub rows_kept: u64,
    pub rows_dropped: u64,
}

/// Summary of a compaction run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactionReport {
    /// Committed version, `None` when nothing was eligible
    pub version: Option<u64>,
    pub files: Vec<CompactedFile>,
    /// Races retried before the commit succeeded
    pub races: u32,
}

impl CompactionReport {
    pub fn rows_dropped(&self) -> u64 {
        self.files.iter().map(|f| f.rows_dropped).sum()
    }
}

/// Runs compactions against one table.
#[derive(Debug)]
pub struct CompactionCoordinator<'a> {
    table: &'a Table,
}

impl<'a> CompactionCoordinator<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    /// Compacts a single file.
    ///
    /// # Returns
    /// The replacement file, or `None` when the file had no surviving rows.
    /// `Err(DvError::FileNotFound)` if the file is not live.
    pub fn compact(&self, file_id: FileId) -> Result<Option<DataFile>, DvError> {
        let report = self.run(|version| {
            version.file(file_id)?;
            Ok(vec![file_id])
        })?;
        Ok(report
            .files
            .into_iter()
            .next()
            .and_then(|f| f.replacement))
    }

    /// Compacts every file whose deleted ratio is at least
    /// `compaction_min_deleted_ratio`. Files without deletions are skipped.
    pub fn compact_all_eligible(&self) -> Result<CompactionReport, DvError> {
        let threshold = self.table.config().compaction_min_deleted_ratio;
        self.run(|version| {
            Ok(version
                .files
                .values()
                .filter(|e| e.deleted_rows() > 0 && e.deleted_ratio() >= threshold)
                .map(|e| e.file.id)
                .collect())
        })
    }

    /// Retries `attempt` on races, re-selecting files from a fresh version.
    fn run<F>(&self, select: F) -> Result<CompactionReport, DvError>
    where
        F: Fn(&TableVersion) -> Result<Vec<FileId>, DvError>,
    {
        let config = self.table.config();
        let mut races = 0;
        loop {
            match self.attempt(&select) {
                Ok(mut report) => {
                    report.races = races;
                    return Ok(report);
                }
                Err(DvError::CompactionRace { file_id, version })
                    if races < config.max_commit_retries =>
                {
                    races += 1;
                    tracing::debug!(file_id, version, attempt = races, "compaction race, retrying");
                    backoff(config.commit_backoff_ms, races);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt<F>(&self, select: &F) -> Result<CompactionReport, DvError>
    where
        F: Fn(&TableVersion) -> Result<Vec<FileId>, DvError>,
    {
        let snapshot = self.table.refresh()?;
        let file_ids = select(&snapshot)?;
        if file_ids.is_empty() {
            return Ok(CompactionReport::default());
        }

        let store = self.table.deletion_vectors();
        if let Some(&busy) = file_ids.iter().find(|&&id| store.is_pending(id)) {
            return Err(DvError::CompactionRace {
                file_id: busy,
                version: snapshot.version,
            });
        }

        #[cfg(feature = "parallel")]
        let rewritten: Vec<Result<CompactedFile, DvError>> = file_ids
            .par_iter()
            .enumerate()
            .map(|(i, &id)| self.rewrite(&snapshot, id, snapshot.next_file_id + i as u64))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let rewritten: Vec<Result<CompactedFile, DvError>> = file_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| self.rewrite(&snapshot, id, snapshot.next_file_id + i as u64))
            .collect();
        let files = rewritten.into_iter().collect::<Result<Vec<_>, _>>()?;

        self.commit(snapshot, files)
    }

    /// Commits rewritten files in place of their originals, then retires the
    /// originals' deletion vector state.
    ///
    /// Commits on other files since `snapshot` are rebased onto; a commit
    /// touching one of the originals is a `CompactionRace`.
    fn commit(
        &self,
        snapshot: Arc<TableVersion>,
        files: Vec<CompactedFile>,
    ) -> Result<CompactionReport, DvError> {
        let removed: Vec<FileId> = files.iter().map(|f| f.old_file).collect();
        let added: Vec<FileId> = files
            .iter()
            .filter_map(|f| f.replacement.as_ref().map(|r| r.id))
            .collect();

        let read_version = snapshot.version;
        let mut rebases = 0;
        let mut base = snapshot;
        let committed = loop {
            let mut builder = base.successor(Operation::Compact {
                removed: removed.clone(),
                added: added.clone(),
            });
            for file in &files {
                builder.remove_file(file.old_file);
                if let Some(replacement) = &file.replacement {
                    builder.add_file(replacement.clone());
                }
            }
            match self.table.log().commit(&base, builder.build())? {
                CommitOutcome::Committed(version) => break version,
                CommitOutcome::Conflict(latest) => {
                    let intervening = self.table.log().touched_since(base.version, &latest)?;
                    if let Some(&file_id) = removed.iter().find(|id| intervening.contains(id)) {
                        return Err(DvError::CompactionRace {
                            file_id,
                            version: latest.version,
                        });
                    }
                    rebases += 1;
                    check_rebases(
                        rebases,
                        self.table.config().max_commit_rebases,
                        read_version,
                        latest.version,
                    )?;
                    base = latest;
                }
            }
        };

        let store = self.table.deletion_vectors();
        for file_id in &removed {
            store.retire(*file_id);
        }
        let report = CompactionReport {
            version: Some(committed.version),
            files,
            races: 0,
        };
        tracing::info!(
            version = committed.version,
            files = removed.len(),
            rows_dropped = report.rows_dropped(),
            "compaction committed"
        );
        Ok(report)
    }

    /// Writes the surviving rows of `file_id` into a new file.
    fn rewrite(
        &self,
        snapshot: &TableVersion,
        file_id: FileId,
        preferred_id: FileId,
    ) -> Result<CompactedFile, DvError> {
        let rows = self.table.file_scan(snapshot, file_id)?.rows()?;
        let old_rows = snapshot.file(file_id)?.file.row_count;
        let surviving = rows.len();

        if surviving == 0 {
            return Ok(CompactedFile {
                old_file: file_id,
                replacement: None,
                rows_kept: 0,
                rows_dropped: old_rows,
            });
        }

        let mut writer = DataFileWriter::new(preferred_id, self.table.data_dir(), &snapshot.schema);
        for row in rows {
            writer.push_row(row.values)?;
        }
        let replacement = writer.finish()?;
        tracing::debug!(old = file_id, new = replacement.id, "compacted data file");

        Ok(CompactedFile {
            old_file: file_id,
            rows_kept: replacement.row_count,
            rows_dropped: old_rows - replacement.row_count,
            replacement: Some(replacement),
        })
    }
}
