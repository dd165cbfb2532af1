//! Deletion vectors: per-file roaring bitmaps of tombstoned row positions.
//!
//! A vector is immutable once published. Merging new deletions produces a
//! new generation stored as a separate artifact, so older table versions can
//! keep reading the generation they reference.
//!
//! Artifact layout (all integers little-endian):
//! ```text
//! [magic "DVEC"][format u32][file_id u64][generation u64][cardinality u64]
//! [payload_len u64][payload_crc u32][payload: portable RoaringTreemap]
//! ```

mod store;

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

use crate::data_file::FileId;
use crate::error::DvError;
use crate::io_utils::checksum;

pub use store::{DeletionVectorStore, PendingGuard};

const MAGIC: &[u8; 4] = b"DVEC";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 44;

/// Reference to a published deletion vector artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionVectorHandle {
    /// Owning data file
    pub file_id: FileId,
    /// Generation, strictly increasing per file
    pub generation: u64,
    /// Number of deleted positions
    pub cardinality: u64,
    /// Artifact file name inside the table's `dv/` directory
    pub artifact: String,
    /// CRC32 of the bitmap payload
    pub checksum: u32,
}

/// File name of a deletion vector artifact.
pub fn artifact_name(file_id: FileId, generation: u64) -> String {
    format!("{:016x}-{:08}.dv", file_id, generation)
}

/// Decoded set of deleted positions for one data file.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionVector {
    pub file_id: FileId,
    pub generation: u64,
    bitmap: RoaringTreemap,
}

impl DeletionVector {
    /// Creates a vector from an explicit bitmap.
    pub fn new(file_id: FileId, generation: u64, bitmap: RoaringTreemap) -> Self {
        Self {
            file_id,
            generation,
            bitmap,
        }
    }

    /// Creates an empty generation-0 vector, used for files without deletions.
    pub fn empty(file_id: FileId) -> Self {
        Self::new(file_id, 0, RoaringTreemap::new())
    }

    pub fn contains(&self, position: u64) -> bool {
        self.bitmap.contains(position)
    }

    pub fn cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn bitmap(&self) -> &RoaringTreemap {
        &self.bitmap
    }

    /// Iterates deleted positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.bitmap.iter()
    }

    /// Encodes the vector as an artifact.
    ///
    /// # Returns
    /// The artifact bytes and the payload checksum.
    pub fn encode(&self) -> Result<(Vec<u8>, u32), DvError> {
        let mut payload = Vec::with_capacity(self.bitmap.serialized_size());
        self.bitmap
            .serialize_into(&mut payload)
            .map_err(|e| DvError::SerializationError(e.to_string()))?;
        let crc = checksum(&payload);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.file_id.to_le_bytes());
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&self.cardinality().to_le_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok((out, crc))
    }

    /// Decodes and validates an artifact against the handle that references it.
    ///
    /// # Returns
    /// `Err(DvError::CorruptBitmap)` if magic, identity, length, checksum or
    /// cardinality do not match.
    pub fn decode(bytes: &[u8], handle: &DeletionVectorHandle) -> Result<Self, DvError> {
        let corrupt = |reason: String| DvError::CorruptBitmap {
            file_id: handle.file_id,
            generation: handle.generation,
            reason,
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic or truncated header".to_string()));
        }
        let format = u32::from_le_bytes(fixed(&bytes[4..8]));
        if format != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", format)));
        }
        let file_id = u64::from_le_bytes(fixed(&bytes[8..16]));
        let generation = u64::from_le_bytes(fixed(&bytes[16..24]));
        let cardinality = u64::from_le_bytes(fixed(&bytes[24..32]));
        let payload_len = u64::from_le_bytes(fixed(&bytes[32..40]));
        let crc = u32::from_le_bytes(fixed(&bytes[40..44]));

        if file_id != handle.file_id || generation != handle.generation {
            return Err(corrupt(format!(
                "artifact holds file {} generation {}",
                file_id, generation
            )));
        }
        let payload = &bytes[HEADER_LEN..];
        if payload.len() as u64 != payload_len {
            return Err(corrupt(format!(
                "payload length {} does not match header {}",
                payload.len(),
                payload_len
            )));
        }
        let actual = checksum(payload);
        if actual != crc || actual != handle.checksum {
            return Err(corrupt(format!(
                "checksum mismatch (stored {:08x}, handle {:08x}, actual {:08x})",
                crc, handle.checksum, actual
            )));
        }

        let bitmap = RoaringTreemap::deserialize_from(payload)
            .map_err(|e| corrupt(format!("undecodable bitmap: {}", e)))?;
        if bitmap.len() != cardinality || cardinality != handle.cardinality {
            return Err(corrupt(format!(
                "cardinality {} does not match header {}",
                bitmap.len(),
                cardinality
            )));
        }

        Ok(Self::new(file_id, generation, bitmap))
    }
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(slice);
    buf
}
