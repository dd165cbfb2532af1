//! JSON manifest format of a table version.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data_file::{data_file_name, ColumnStats, DataFile, FileId};
use crate::deletion_vector::DeletionVectorHandle;
use crate::error::DvError;
use crate::schema::Schema;

use super::{FileEntry, Operation, TableVersion};

/// Current manifest format version.
pub const MANIFEST_FORMAT: u32 = 1;

/// File name of the manifest for `version`.
pub fn manifest_name(version: u64) -> String {
    format!("{:020}.json", version)
}

/// Self-contained description of one version, as stored in `_versions/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format: u32,
    pub version: u64,
    pub parent: Option<u64>,
    pub timestamp_ms: u64,
    pub operation: Operation,
    pub schema: Schema,
    pub next_file_id: FileId,
    pub touched: Vec<FileId>,
    pub files: Vec<ManifestFile>,
}

/// One live data file in a manifest. Paths are relative to the table directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub id: FileId,
    pub path: String,
    pub row_count: u64,
    pub size_bytes: u64,
    pub stats: BTreeMap<String, ColumnStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_vector: Option<DeletionVectorHandle>,
}

impl Manifest {
    /// Describes `version` with paths relative to `table_dir`.
    pub fn from_version(version: &TableVersion, table_dir: &Path) -> Self {
        let files = version
            .files
            .values()
            .map(|entry| {
                let file = &entry.file;
                let path = file
                    .path
                    .strip_prefix(table_dir)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_else(|_| format!("data/{}", data_file_name(file.id)));
                ManifestFile {
                    id: file.id,
                    path,
                    row_count: file.row_count,
                    size_bytes: file.size_bytes,
                    stats: file.stats.clone(),
                    deletion_vector: entry.deletion_vector.clone(),
                }
            })
            .collect();

        Self {
            format: MANIFEST_FORMAT,
            version: version.version,
            parent: version.parent,
            timestamp_ms: version.timestamp_ms,
            operation: version.operation.clone(),
            schema: version.schema.clone(),
            next_file_id: version.next_file_id,
            touched: version.touched.iter().copied().collect(),
            files,
        }
    }

    /// Rebuilds the version, resolving file paths against `table_dir`.
    pub fn into_version(self, table_dir: &Path) -> Result<TableVersion, DvError> {
        if self.format != MANIFEST_FORMAT {
            return Err(DvError::DataCorruption(format!(
                "manifest {} has unsupported format {}",
                self.version, self.format
            )));
        }

        let mut files = BTreeMap::new();
        for entry in self.files {
            if let Some(dv) = &entry.deletion_vector {
                if dv.file_id != entry.id || dv.cardinality > entry.row_count {
                    return Err(DvError::DataCorruption(format!(
                        "manifest {} pairs file {} with deletion vector of file {} ({} rows)",
                        self.version, entry.id, dv.file_id, dv.cardinality
                    )));
                }
            }
            let file = DataFile {
                id: entry.id,
                path: table_dir.join(&entry.path),
                row_count: entry.row_count,
                stats: entry.stats,
                size_bytes: entry.size_bytes,
            };
            files.insert(
                entry.id,
                FileEntry {
                    file: Arc::new(file),
                    deletion_vector: entry.deletion_vector,
                },
            );
        }

        Ok(TableVersion {
            version: self.version,
            parent: self.parent,
            schema: self.schema,
            files,
            next_file_id: self.next_file_id,
            touched: self.touched.into_iter().collect(),
            operation: self.operation,
            timestamp_ms: self.timestamp_ms,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, DvError> {
        serde_json::to_vec_pretty(self).map_err(|e| DvError::SerializationError(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DvError> {
        serde_json::from_slice(bytes).map_err(|e| DvError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, Value};
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_manifest_paths_are_relative() {
        let table_dir = Path::new("/tables/customers");
        let schema = Schema::new(vec![ColumnDef::new("id", ColumnType::Int64)]).unwrap();
        let mut builder = TableVersion::initial(schema).successor(Operation::Append { files: vec![1] });
        builder.add_file(DataFile {
            id: 1,
            path: table_dir.join("data").join(data_file_name(1)),
            row_count: 3,
            stats: BTreeMap::from([(
                "id".to_string(),
                ColumnStats {
                    min: Value::Int(0),
                    max: Value::Int(2),
                },
            )]),
            size_bytes: 64,
        });
        let version = builder.build();

        let manifest = Manifest::from_version(&version, table_dir);
        assert_eq!(manifest.files[0].path, "data/0000000000000001.dvf");

        let json = manifest.to_json().unwrap();
        let moved = Path::new("/elsewhere");
        let restored = Manifest::from_json(&json)
            .unwrap()
            .into_version(moved)
            .unwrap();
        assert_eq!(
            restored.file(1).unwrap().file.path,
            moved.join("data/0000000000000001.dvf")
        );
        assert_eq!(restored.touched, version.touched);
        assert_eq!(restored.operation, version.operation);
    }

    #[timeout(1000)]
    #[test]
    fn test_mismatched_vector_is_rejected() {
        let json = br#"{
            "format": 1, "version": 3, "parent": 2, "timestamp_ms": 0,
            "operation": {"kind": "create"},
            "schema": {"columns": [{"name": "id", "ty": "Int64"}]},
            "next_file_id": 2, "touched": [],
            "files": [{
                "id": 1, "path": "data/0000000000000001.dvf", "row_count": 10,
                "size_bytes": 1, "stats": {},
                "deletion_vector": {"file_id": 7, "generation": 1, "cardinality": 1,
                                    "artifact": "x.dv", "checksum": 0}
            }]
        }"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert!(matches!(
            manifest.into_version(Path::new("/t")),
            Err(DvError::DataCorruption(_))
        ));
    }
}
