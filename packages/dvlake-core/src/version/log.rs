//! Append-only version log with an atomically swapped current pointer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::TableConfig;
use crate::data_file::FileId;
use crate::error::DvError;
use crate::io_utils::{classify_io_error, publish_exclusive, retry_io_operation};
use crate::schema::Schema;

use super::manifest::{manifest_name, Manifest};
use super::TableVersion;

/// Result of a commit attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    /// The version was published and is now current.
    Committed(Arc<TableVersion>),
    /// Another commit published the same version number first. Carries the
    /// newest version known after refreshing.
    Conflict(Arc<TableVersion>),
}

/// Table version history under `<table>/_versions`.
///
/// Manifests are published with create-new semantics, which makes the
/// manifest write the point at which a commit wins. The in-memory pointer
/// only ever moves forward.
#[derive(Debug)]
pub struct VersionLog {
    table_dir: PathBuf,
    versions_dir: PathBuf,
    current: ArcSwap<TableVersion>,
    io_max_retries: u32,
    io_retry_delay_ms: u64,
}

impl VersionLog {
    /// Creates a new table with an empty version 0.
    ///
    /// # Returns
    /// `Err(DvError::TableAlreadyExists)` if the directory already holds a table.
    pub fn create(config: &TableConfig, schema: Schema) -> Result<Self, DvError> {
        let log = Self::empty(config, TableVersion::initial(schema));
        std::fs::create_dir_all(&log.versions_dir)
            .map_err(|e| classify_io_error(e, "Failed to create versions directory"))?;

        let initial = log.current();
        if !log.publish(&initial)? {
            return Err(DvError::TableAlreadyExists(
                log.table_dir.display().to_string(),
            ));
        }
        tracing::info!(table = %log.table_dir.display(), "created table");
        Ok(log)
    }

    /// Opens an existing table at its newest version.
    pub fn open(config: &TableConfig) -> Result<Self, DvError> {
        let versions_dir = config.data_dir.join("_versions");
        let latest = latest_on_disk(&versions_dir)?.ok_or_else(|| {
            DvError::IoError(format!(
                "no table manifests in {}",
                versions_dir.display()
            ))
        })?;

        let log = Self::empty(config, placeholder());
        let version = log.load_version(latest)?;
        log.current.store(Arc::new(version));
        tracing::info!(
            table = %log.table_dir.display(),
            version = latest,
            "opened table"
        );
        Ok(log)
    }

    fn empty(config: &TableConfig, version: TableVersion) -> Self {
        Self {
            table_dir: config.data_dir.clone(),
            versions_dir: config.data_dir.join("_versions"),
            current: ArcSwap::new(Arc::new(version)),
            io_max_retries: config.io_max_retries,
            io_retry_delay_ms: config.io_retry_delay_ms,
        }
    }

    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    /// Returns the newest version this process has observed.
    pub fn current(&self) -> Arc<TableVersion> {
        self.current.load_full()
    }

    /// Reads the manifest of `version` from disk.
    pub fn load_version(&self, version: u64) -> Result<TableVersion, DvError> {
        let path = self.versions_dir.join(manifest_name(version));
        let bytes = retry_io_operation(
            || std::fs::read(&path).map_err(|e| classify_io_error(e, "Failed to read manifest")),
            self.io_max_retries,
            self.io_retry_delay_ms,
            "manifest load",
        )?;
        Manifest::from_json(&bytes)?.into_version(&self.table_dir)
    }

    /// Picks up versions committed by other handles or processes.
    pub fn refresh(&self) -> Result<Arc<TableVersion>, DvError> {
        let mut newest = self.current();
        loop {
            let next = newest.version + 1;
            if !self.versions_dir.join(manifest_name(next)).exists() {
                break;
            }
            newest = Arc::new(self.load_version(next)?);
        }
        Ok(self.advance(newest))
    }

    /// Attempts to publish `next` as the successor of `base`.
    ///
    /// # Arguments
    /// * `base` - Snapshot the new version was derived from
    /// * `next` - New version; must be numbered `base.version + 1`
    pub fn commit(
        &self,
        base: &Arc<TableVersion>,
        next: TableVersion,
    ) -> Result<CommitOutcome, DvError> {
        if next.version != base.version + 1 {
            return Err(DvError::DataCorruption(format!(
                "version {} cannot follow version {}",
                next.version, base.version
            )));
        }

        let current = self.current();
        if current.version != base.version {
            // Already known to be stale; skip the filesystem round trip.
            return Ok(CommitOutcome::Conflict(self.refresh()?));
        }

        let next = Arc::new(next);
        if !self.publish(&next)? {
            tracing::debug!(version = next.version, "lost commit race");
            return Ok(CommitOutcome::Conflict(self.refresh()?));
        }

        self.advance(next.clone());
        tracing::debug!(
            version = next.version,
            touched = next.touched.len(),
            "committed version"
        );
        Ok(CommitOutcome::Committed(next))
    }

    /// Files touched by commits after `base` up to and including `latest`.
    pub fn touched_since(
        &self,
        base: u64,
        latest: &TableVersion,
    ) -> Result<BTreeSet<FileId>, DvError> {
        let mut touched = latest.touched.clone();
        for version in (base + 1)..latest.version {
            touched.extend(self.load_version(version)?.touched);
        }
        Ok(touched)
    }

    /// Lists every version from 0 to the current one.
    pub fn history(&self) -> Result<Vec<TableVersion>, DvError> {
        let latest = self.refresh()?.version;
        (0..=latest).map(|v| self.load_version(v)).collect()
    }

    fn publish(&self, version: &TableVersion) -> Result<bool, DvError> {
        let bytes = Manifest::from_version(version, &self.table_dir).to_json()?;
        let path = self.versions_dir.join(manifest_name(version.version));
        retry_io_operation(
            || publish_exclusive(&path, &bytes),
            self.io_max_retries,
            self.io_retry_delay_ms,
            "manifest publish",
        )
    }

    /// Moves the pointer to `candidate` unless it already points further.
    fn advance(&self, candidate: Arc<TableVersion>) -> Arc<TableVersion> {
        let mut current = self.current.load_full();
        loop {
            if current.version >= candidate.version {
                return current;
            }
            let previous = self.current.compare_and_swap(&current, candidate.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return candidate;
            }
            current = arc_swap::Guard::into_inner(previous);
        }
    }
}

/// Highest manifest number present in `versions_dir`.
fn latest_on_disk(versions_dir: &Path) -> Result<Option<u64>, DvError> {
    let entries = match std::fs::read_dir(versions_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(classify_io_error(e, "Failed to list versions")),
    };

    let mut latest = None;
    for entry in entries {
        let entry = entry.map_err(|e| classify_io_error(e, "Failed to list versions"))?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        if let Ok(version) = stem.parse::<u64>() {
            latest = latest.max(Some(version));
        }
    }
    Ok(latest)
}

fn placeholder() -> TableVersion {
    TableVersion::initial(Schema { columns: Vec::new() })
}
