//! Deletion vector store: merge, load and retire per-file tombstone bitmaps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use roaring::RoaringTreemap;

use crate::config::TableConfig;
use crate::data_file::{DataFile, FileId};
use crate::error::DvError;
use crate::io_utils::{classify_io_error, retry_io_operation, write_exclusive};

use super::{artifact_name, DeletionVector, DeletionVectorHandle};

/// Upper bound on generation probing when artifacts already exist on disk.
const MAX_GENERATION_PROBES: u64 = 1024;

/// Per-file writer state, guarded by the single-writer lock.
#[derive(Debug, Default)]
struct FileState {
    next_generation: u64,
}

/// Persists and caches deletion vectors.
///
/// Merges for the same file serialize on a per-file lock; merges for
/// different files never contend. Published artifacts are never rewritten.
#[derive(Debug)]
pub struct DeletionVectorStore {
    /// Directory holding `.dv` artifacts
    dir: PathBuf,
    /// Newest decoded generation of each file
    cache: DashMap<FileId, Arc<DeletionVector>>,
    /// Single-writer locks per file
    writers: DashMap<FileId, Arc<Mutex<FileState>>>,
    /// Merges written but not yet committed or abandoned
    pending: Arc<DashMap<FileId, usize>>,
    /// Files whose vectors were retired by compaction
    retired: DashSet<FileId>,
    io_max_retries: u32,
    io_retry_delay_ms: u64,
}

impl DeletionVectorStore {
    /// Creates a store writing into `<data_dir>/dv`.
    pub fn new(config: &TableConfig) -> Self {
        Self {
            dir: config.data_dir.join("dv"),
            cache: DashMap::new(),
            writers: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            retired: DashSet::new(),
            io_max_retries: config.io_max_retries,
            io_retry_delay_ms: config.io_retry_delay_ms,
        }
    }

    /// Returns the artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unions `new_positions` into the file's current deletion set.
    ///
    /// # Arguments
    /// * `file` - Owning data file (used for range checks)
    /// * `base` - Vector referenced by the snapshot being modified, if any
    /// * `new_positions` - Positions to tombstone
    ///
    /// # Returns
    /// A handle to a newly published generation, or `base` itself when the
    /// union adds nothing.
    pub fn merge(
        &self,
        file: &DataFile,
        base: Option<&DeletionVectorHandle>,
        new_positions: &RoaringTreemap,
    ) -> Result<DeletionVectorHandle, DvError> {
        if self.retired.contains(&file.id) {
            return Err(DvError::FileRetired { file_id: file.id });
        }
        if let Some(max) = new_positions.max() {
            file.check_position(max)?;
        }

        let state = self
            .writers
            .entry(file.id)
            .or_insert_with(|| Arc::new(Mutex::new(FileState::default())))
            .clone();
        let mut state = state.lock();

        let (mut bitmap, base_generation) = match base {
            Some(handle) => {
                let current = self.load(handle)?;
                if new_positions.is_subset(current.bitmap()) {
                    tracing::debug!(
                        file_id = file.id,
                        generation = handle.generation,
                        "merge adds no positions, keeping generation"
                    );
                    return Ok(handle.clone());
                }
                (current.bitmap().clone(), handle.generation)
            }
            None => (RoaringTreemap::new(), 0),
        };
        bitmap |= new_positions;

        let mut generation = state.next_generation.max(base_generation + 1);
        let mut probes = 0;
        let handle = loop {
            let vector = DeletionVector::new(file.id, generation, bitmap.clone());
            if let Some(handle) = self.publish(&vector)? {
                self.cache_newest(Arc::new(vector));
                break handle;
            }
            probes += 1;
            if probes >= MAX_GENERATION_PROBES {
                return Err(DvError::IoError(format!(
                    "no free deletion vector generation for file {} after {} probes",
                    file.id, probes
                )));
            }
            generation += 1;
        };
        state.next_generation = generation + 1;

        tracing::debug!(
            file_id = file.id,
            generation,
            cardinality = handle.cardinality,
            added = new_positions.len(),
            "merged deletion vector"
        );
        Ok(handle)
    }

    /// Writes an artifact unless its name is taken.
    fn publish(&self, vector: &DeletionVector) -> Result<Option<DeletionVectorHandle>, DvError> {
        let (bytes, crc) = vector.encode()?;
        let name = artifact_name(vector.file_id, vector.generation);
        let path = self.dir.join(&name);

        let written = retry_io_operation(
            || {
                std::fs::create_dir_all(&self.dir).map_err(|e| {
                    classify_io_error(e, "Failed to create deletion vector directory")
                })?;
                write_exclusive(&path, &bytes)
            },
            self.io_max_retries,
            self.io_retry_delay_ms,
            "deletion vector publish",
        )?;

        Ok(written.then(|| DeletionVectorHandle {
            file_id: vector.file_id,
            generation: vector.generation,
            cardinality: vector.cardinality(),
            artifact: name,
            checksum: crc,
        }))
    }

    /// Loads the vector a handle refers to, verifying its checksum.
    ///
    /// # Returns
    /// `Err(DvError::CorruptBitmap)` if the artifact fails validation.
    pub fn load(&self, handle: &DeletionVectorHandle) -> Result<Arc<DeletionVector>, DvError> {
        if let Some(cached) = self.cache.get(&handle.file_id) {
            if cached.generation == handle.generation {
                return Ok(cached.clone());
            }
        }

        let path = self.dir.join(&handle.artifact);
        let bytes = retry_io_operation(
            || {
                std::fs::read(&path)
                    .map_err(|e| classify_io_error(e, "Failed to read deletion vector"))
            },
            self.io_max_retries,
            self.io_retry_delay_ms,
            "deletion vector load",
        )?;

        let vector = match DeletionVector::decode(&bytes, handle) {
            Ok(vector) => Arc::new(vector),
            Err(err) => {
                tracing::error!(
                    file_id = handle.file_id,
                    generation = handle.generation,
                    artifact = %handle.artifact,
                    "deletion vector failed validation: {}",
                    err
                );
                return Err(err);
            }
        };
        self.cache_newest(vector.clone());
        Ok(vector)
    }

    /// Caches `vector` unless a newer generation of its file is already cached.
    ///
    /// Older generations are only read back for historical versions and are
    /// loaded from disk again when needed.
    fn cache_newest(&self, vector: Arc<DeletionVector>) {
        self.cache
            .entry(vector.file_id)
            .and_modify(|cached| {
                if cached.generation < vector.generation {
                    *cached = vector.clone();
                }
            })
            .or_insert(vector);
    }

    /// Loads the vector for an optional handle; files without one get an
    /// empty vector.
    pub fn load_or_empty(
        &self,
        file_id: FileId,
        handle: Option<&DeletionVectorHandle>,
    ) -> Result<Arc<DeletionVector>, DvError> {
        match handle {
            Some(handle) => self.load(handle),
            None => Ok(Arc::new(DeletionVector::empty(file_id))),
        }
    }

    /// Drops all in-memory state for a file whose data was compacted away.
    ///
    /// Artifacts stay on disk so older versions remain readable; later merges
    /// against the file fail with `FileRetired`.
    pub fn retire(&self, file_id: FileId) {
        self.retired.insert(file_id);
        self.writers.remove(&file_id);
        self.pending.remove(&file_id);
        self.cache.remove(&file_id);
        tracing::debug!(file_id, "retired deletion vector state");
    }

    pub fn is_retired(&self, file_id: FileId) -> bool {
        self.retired.contains(&file_id)
    }

    /// Marks a delete against `file_id` as in flight until the guard drops.
    pub fn track_pending(&self, file_id: FileId) -> PendingGuard {
        *self.pending.entry(file_id).or_insert(0) += 1;
        PendingGuard {
            pending: Arc::clone(&self.pending),
            file_id,
        }
    }

    /// Returns `true` while a delete holds a pending guard for the file.
    pub fn is_pending(&self, file_id: FileId) -> bool {
        self.pending.get(&file_id).map(|n| *n > 0).unwrap_or(false)
    }

    /// Number of decoded vectors currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// RAII marker of an in-flight delete against one file.
///
/// Released when the delete commits or is abandoned (dropped).
#[derive(Debug)]
pub struct PendingGuard {
    pending: Arc<DashMap<FileId, usize>>,
    file_id: FileId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .remove_if_mut(&self.file_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}
