//! Table handle: append, delete, scan and compact over the version log.
//!
//! All writers follow the same optimistic protocol: read a snapshot, stage
//! new artifacts, then commit the successor version with a compare-and-swap.
//! A lost race against commits on disjoint files is rebased; a lost race on
//! a shared file replans.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::compaction::{CompactionCoordinator, CompactionReport};
use crate::config::TableConfig;
use crate::data_file::{DataFile, DataFileWriter, FileId};
use crate::deletion_vector::{DeletionVector, DeletionVectorHandle, DeletionVectorStore, PendingGuard};
use crate::error::DvError;
use crate::planner::{DeletePlan, DeletePlanner, FileAction, PlanStats};
use crate::predicate::Predicate;
use crate::scan::{scan, FileScan, TableScan};
use crate::schema::{Row, Schema};
use crate::version::{CommitOutcome, Operation, TableVersion, VersionBuilder, VersionLog};

/// Result of a committed (or no-op) delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Version the delete committed, or the snapshot version for a no-op
    pub version: u64,
    /// Rows hidden from readers by this delete
    pub deleted_rows: u64,
    pub files_removed: usize,
    pub files_marked: usize,
    pub files_rewritten: usize,
    /// Replans after conflicting commits
    pub retries: u32,
    /// Commits retried unchanged on top of disjoint commits
    pub rebases: u32,
    pub plan_stats: PlanStats,
}

impl DeleteOutcome {
    /// `true` when nothing was committed.
    pub fn is_noop(&self) -> bool {
        self.deleted_rows == 0
    }
}

/// Artifacts written for a plan, ready to be referenced by a commit.
#[derive(Debug, Default)]
struct StagedDelete {
    marks: BTreeMap<FileId, DeletionVectorHandle>,
    removes: BTreeSet<FileId>,
    rewrites: BTreeMap<FileId, DataFile>,
}

/// Handle to one table directory.
#[derive(Debug)]
pub struct Table {
    config: TableConfig,
    log: VersionLog,
    store: DeletionVectorStore,
}

impl Table {
    /// Creates a new, empty table in `config.data_dir`.
    ///
    /// # Returns
    /// `Err(DvError::TableAlreadyExists)` if a table is already there.
    pub fn create(config: TableConfig, schema: Schema) -> Result<Self, DvError> {
        config.validate()?;
        let log = VersionLog::create(&config, schema)?;
        let store = DeletionVectorStore::new(&config);
        Ok(Self { config, log, store })
    }

    /// Opens an existing table at its newest version.
    pub fn open(config: TableConfig) -> Result<Self, DvError> {
        config.validate()?;
        let log = VersionLog::open(&config)?;
        let store = DeletionVectorStore::new(&config);
        Ok(Self { config, log, store })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn schema(&self) -> Schema {
        self.current().schema.clone()
    }

    /// Newest version known to this handle.
    pub fn current(&self) -> Arc<TableVersion> {
        self.log.current()
    }

    /// Picks up commits made through other handles.
    pub fn refresh(&self) -> Result<Arc<TableVersion>, DvError> {
        self.log.refresh()
    }

    /// Every version from 0 to the newest, oldest first.
    pub fn history(&self) -> Result<Vec<TableVersion>, DvError> {
        self.log.history()
    }

    /// Reads a past version from its manifest.
    pub fn version(&self, version: u64) -> Result<TableVersion, DvError> {
        self.log.load_version(version)
    }

    pub fn deletion_vectors(&self) -> &DeletionVectorStore {
        &self.store
    }

    pub(crate) fn log(&self) -> &VersionLog {
        &self.log
    }

    /// Current deletion vector of a live file, if it has one.
    pub fn deletion_vector(&self, file_id: FileId) -> Result<Option<Arc<DeletionVector>>, DvError> {
        let version = self.current();
        match &version.file(file_id)?.deletion_vector {
            Some(handle) => Ok(Some(self.store.load(handle)?)),
            None => Ok(None),
        }
    }

    /// Appends rows as new data files of at most `rows_per_file` rows each.
    ///
    /// # Returns
    /// The committed version.
    pub fn append(&self, rows: Vec<Row>) -> Result<Arc<TableVersion>, DvError> {
        let snapshot = self.log.refresh()?;
        if rows.is_empty() {
            return Ok(snapshot);
        }
        for row in &rows {
            snapshot.schema.check_row(row)?;
        }

        let mut files = Vec::new();
        let mut next_id = snapshot.next_file_id;
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let mut writer = DataFileWriter::new(next_id, self.data_dir(), &snapshot.schema);
            for row in rows.by_ref().take(self.config.rows_per_file) {
                writer.push_row(row)?;
            }
            let file = writer.finish()?;
            next_id = file.id + 1;
            files.push(file);
        }

        let ids: Vec<FileId> = files.iter().map(|f| f.id).collect();
        let read_version = snapshot.version;
        let mut rebases = 0;
        let mut base = snapshot;
        loop {
            let mut builder = base.successor(Operation::Append { files: ids.clone() });
            for file in &files {
                builder.add_file(file.clone());
            }
            match self.log.commit(&base, builder.build())? {
                CommitOutcome::Committed(version) => {
                    tracing::info!(
                        version = version.version,
                        files = ids.len(),
                        "appended rows"
                    );
                    return Ok(version);
                }
                // New files cannot overlap anything another commit touched.
                CommitOutcome::Conflict(latest) => {
                    rebases += 1;
                    check_rebases(
                        rebases,
                        self.config.max_commit_rebases,
                        read_version,
                        latest.version,
                    )?;
                    base = latest;
                }
            }
        }
    }

    /// Deletes every row matching `predicate` from the newest version.
    pub fn delete(&self, predicate: &Predicate) -> Result<DeleteOutcome, DvError> {
        let snapshot = self.log.refresh()?;
        self.delete_at(snapshot, predicate)
    }

    /// Deletes every row matching `predicate`, planning against `snapshot`.
    ///
    /// The commit still lands on top of the newest version: if newer commits
    /// touched files the plan touches, the delete replans.
    ///
    /// # Returns
    /// `Err(DvError::CommitConflict)` after `max_commit_retries` replans.
    pub fn delete_at(
        &self,
        snapshot: Arc<TableVersion>,
        predicate: &Predicate,
    ) -> Result<DeleteOutcome, DvError> {
        let planner = DeletePlanner::new(&self.store, self.config.deletion_vectors_enabled);
        let read_version = snapshot.version;
        let mut snapshot = snapshot;
        let mut retries = 0;
        let mut rebases = 0;

        loop {
            let plan = planner.plan(predicate, &snapshot)?;
            if plan.is_empty() {
                tracing::debug!(version = snapshot.version, predicate = %predicate, "delete matched no live rows");
                return Ok(DeleteOutcome {
                    version: snapshot.version,
                    deleted_rows: 0,
                    files_removed: 0,
                    files_marked: 0,
                    files_rewritten: 0,
                    retries,
                    rebases,
                    plan_stats: plan.stats,
                });
            }

            let touched = plan.touched_files();
            let _pending: Vec<PendingGuard> =
                touched.iter().map(|&id| self.store.track_pending(id)).collect();
            let deleted_rows = plan.deleted_rows(&snapshot);
            let staged = match self.stage(&plan, &snapshot) {
                Ok(staged) => Some(staged),
                // A file in the snapshot was compacted away meanwhile.
                Err(DvError::FileRetired { file_id }) => {
                    tracing::debug!(file_id, "planned file was compacted, replanning");
                    None
                }
                Err(err) => return Err(err),
            };

            let mut base = snapshot.clone();
            let latest = loop {
                let Some(staged) = &staged else {
                    break self.log.refresh()?;
                };
                let next = apply_staged(&base, staged, predicate, deleted_rows)?;
                match self.log.commit(&base, next)? {
                    CommitOutcome::Committed(version) => {
                        let outcome = DeleteOutcome {
                            version: version.version,
                            deleted_rows,
                            files_removed: staged.removes.len(),
                            files_marked: staged.marks.len(),
                            files_rewritten: staged.rewrites.len(),
                            retries,
                            rebases,
                            plan_stats: plan.stats,
                        };
                        tracing::info!(
                            version = outcome.version,
                            predicate = %predicate,
                            deleted = outcome.deleted_rows,
                            removed = outcome.files_removed,
                            marked = outcome.files_marked,
                            rewritten = outcome.files_rewritten,
                            retries,
                            "delete committed"
                        );
                        return Ok(outcome);
                    }
                    CommitOutcome::Conflict(latest) => {
                        let intervening = self.log.touched_since(base.version, &latest)?;
                        if intervening.is_disjoint(&touched) {
                            rebases += 1;
                            check_rebases(
                                rebases,
                                self.config.max_commit_rebases,
                                read_version,
                                latest.version,
                            )?;
                            base = latest;
                            continue;
                        }
                        break latest;
                    }
                }
            };

            retries += 1;
            if retries > self.config.max_commit_retries {
                tracing::warn!(
                    read_version,
                    current_version = latest.version,
                    attempts = retries,
                    "delete gave up after repeated conflicts"
                );
                return Err(DvError::CommitConflict {
                    read_version,
                    current_version: latest.version,
                    attempts: retries,
                });
            }
            tracing::debug!(
                attempt = retries,
                version = latest.version,
                "delete conflicted on a shared file, replanning"
            );
            backoff(self.config.commit_backoff_ms, retries);
            snapshot = latest;
        }
    }

    /// Writes the artifacts a plan needs. Nothing becomes visible here.
    fn stage(&self, plan: &DeletePlan, snapshot: &TableVersion) -> Result<StagedDelete, DvError> {
        let mut staged = StagedDelete::default();
        let mut next_id = snapshot.next_file_id;

        for (&file_id, action) in &plan.actions {
            let entry = snapshot.file(file_id)?;
            match action {
                FileAction::RemoveFile => {
                    staged.removes.insert(file_id);
                }
                FileAction::MarkRows(positions) => {
                    let handle = self.store.merge(
                        &entry.file,
                        entry.deletion_vector.as_ref(),
                        positions,
                    )?;
                    staged.marks.insert(file_id, handle);
                }
                FileAction::RewriteFile(positions) => {
                    let existing = self
                        .store
                        .load_or_empty(file_id, entry.deletion_vector.as_ref())?;
                    let mut writer =
                        DataFileWriter::new(next_id, self.data_dir(), &snapshot.schema);
                    for row in scan(&entry.file, Some(existing)).rows()? {
                        if !positions.contains(row.address.position) {
                            writer.push_row(row.values)?;
                        }
                    }
                    let file = writer.finish()?;
                    next_id = file.id + 1;
                    tracing::debug!(old = file_id, new = file.id, "rewrote data file");
                    staged.rewrites.insert(file_id, file);
                }
            }
        }
        Ok(staged)
    }

    /// Scans the newest version.
    pub fn scan(&self) -> Result<TableScan, DvError> {
        let version = self.current();
        self.scan_version(&version)
    }

    /// Scans a specific version, masking each file with its deletion vector.
    ///
    /// # Returns
    /// `Err(DvError::CorruptBitmap)` if a referenced vector fails validation.
    pub fn scan_version(&self, version: &TableVersion) -> Result<TableScan, DvError> {
        let files = version
            .files
            .values()
            .map(|entry| self.file_scan(version, entry.file.id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableScan::new(files))
    }

    /// Scans one live file of `version`.
    pub fn file_scan(&self, version: &TableVersion, file_id: FileId) -> Result<FileScan, DvError> {
        let entry = version.file(file_id)?;
        let dv = match &entry.deletion_vector {
            Some(handle) => Some(self.store.load(handle)?),
            None => None,
        };
        Ok(scan(&entry.file, dv))
    }

    /// Rewrites one file without its tombstoned rows.
    ///
    /// # Returns
    /// The replacement file, or `None` when no row survived and the file
    /// was simply dropped.
    pub fn compact(&self, file_id: FileId) -> Result<Option<DataFile>, DvError> {
        CompactionCoordinator::new(self).compact(file_id)
    }

    /// Compacts every file whose deleted ratio reaches the configured threshold.
    pub fn compact_all_eligible(&self) -> Result<CompactionReport, DvError> {
        CompactionCoordinator::new(self).compact_all_eligible()
    }

    pub(crate) fn data_dir(&self) -> std::path::PathBuf {
        self.config.data_dir.join("data")
    }
}

/// Builds the successor of `base` with the staged artifacts applied.
fn apply_staged(
    base: &TableVersion,
    staged: &StagedDelete,
    predicate: &Predicate,
    deleted_rows: u64,
) -> Result<TableVersion, DvError> {
    let mut builder: VersionBuilder = base.successor(Operation::Delete {
        predicate: predicate.to_string(),
        deleted_rows,
    });
    for &file_id in &staged.removes {
        remove_live(&mut builder, base, file_id)?;
    }
    for (&file_id, handle) in &staged.marks {
        builder.set_deletion_vector(file_id, handle.clone())?;
    }
    for (&file_id, file) in &staged.rewrites {
        remove_live(&mut builder, base, file_id)?;
        builder.add_file(file.clone());
    }
    Ok(builder.build())
}

fn remove_live(builder: &mut VersionBuilder, base: &TableVersion, file_id: FileId) -> Result<(), DvError> {
    builder
        .remove_file(file_id)
        .map(|_| ())
        .ok_or(DvError::FileNotFound {
            file_id,
            version: base.version,
        })
}

/// Fails once concurrent commits on other files forced more than `limit` rebases.
pub(crate) fn check_rebases(
    rebases: u32,
    limit: u32,
    read_version: u64,
    current_version: u64,
) -> Result<(), DvError> {
    if rebases > limit {
        tracing::warn!(
            read_version,
            current_version,
            rebases,
            "gave up rebasing onto concurrent commits"
        );
        return Err(DvError::CommitConflict {
            read_version,
            current_version,
            attempts: rebases,
        });
    }
    Ok(())
}

pub(crate) fn backoff(base_ms: u64, attempt: u32) {
    if base_ms > 0 {
        std::thread::sleep(Duration::from_millis(base_ms * attempt as u64));
    }
}
