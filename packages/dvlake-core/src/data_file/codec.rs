//! On-disk data file format.
//!
//! Layout:
//! ```text
//! [magic "DVDF"][format u32][header_len u32][header_crc u32][header][chunk 0][chunk 1]...
//! ```
//! The header is a bincode [`FileHeader`] listing every column chunk with its
//! offset (relative to the end of the header), length and CRC32. Chunks are
//! bincode-encoded [`ColumnData`] so a reader can decode only the columns it
//! needs.

use std::fs::File;
use std::path::Path;

#[cfg(feature = "persist")]
use memmap2::Mmap;

use serde::{Deserialize, Serialize};

use crate::error::DvError;
use crate::io_utils::{checksum, classify_io_error};
use crate::schema::ColumnType;

use super::{ColumnBatch, ColumnData, FileId};

pub(crate) const MAGIC: &[u8; 4] = b"DVDF";
pub(crate) const FORMAT_VERSION: u32 = 1;
const PREAMBLE_LEN: usize = 16;

/// Location and checksum of one column chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub name: String,
    pub ty: ColumnType,
    pub offset: u64,
    pub len: u64,
    pub crc: u32,
}

/// Data file header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub file_id: FileId,
    pub row_count: u64,
    pub chunks: Vec<ChunkMeta>,
}

/// Raw bytes of a data file, read into memory or memory-mapped.
#[derive(Debug)]
pub(crate) enum FileBytes {
    /// In-memory copy
    Memory(Vec<u8>),
    /// Memory-mapped file
    #[cfg(feature = "persist")]
    Mmap(Mmap),
}

impl FileBytes {
    /// Opens a file with the configured access method.
    pub(crate) fn open(path: &Path) -> Result<Self, DvError> {
        #[cfg(feature = "persist")]
        {
            let file =
                File::open(path).map_err(|e| classify_io_error(e, "Failed to open data file"))?;
            // SAFETY: data files are never modified after they are published.
            let mmap = unsafe {
                Mmap::map(&file).map_err(|e| classify_io_error(e, "Failed to memory map file"))?
            };
            Ok(FileBytes::Mmap(mmap))
        }

        #[cfg(not(feature = "persist"))]
        {
            use std::io::Read;

            let mut file =
                File::open(path).map_err(|e| classify_io_error(e, "Failed to open data file"))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| classify_io_error(e, "Failed to read data file"))?;
            Ok(FileBytes::Memory(data))
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            FileBytes::Memory(vec) => vec.as_slice(),
            #[cfg(feature = "persist")]
            FileBytes::Mmap(mmap) => mmap.as_ref(),
        }
    }
}

/// Encodes columns into the file format.
pub(crate) fn encode(
    file_id: FileId,
    row_count: u64,
    columns: &[(String, ColumnData)],
) -> Result<Vec<u8>, DvError> {
    let mut body = Vec::new();
    let mut chunks = Vec::with_capacity(columns.len());

    for (name, data) in columns {
        if data.len() as u64 != row_count {
            return Err(DvError::SchemaMismatch(format!(
                "column '{}' has {} values, expected {}",
                name,
                data.len(),
                row_count
            )));
        }
        let bytes =
            bincode::serialize(data).map_err(|e| DvError::SerializationError(e.to_string()))?;
        chunks.push(ChunkMeta {
            name: name.clone(),
            ty: data.column_type(),
            offset: body.len() as u64,
            len: bytes.len() as u64,
            crc: checksum(&bytes),
        });
        body.extend_from_slice(&bytes);
    }

    let header = FileHeader {
        file_id,
        row_count,
        chunks,
    };
    let header_bytes =
        bincode::serialize(&header).map_err(|e| DvError::SerializationError(e.to_string()))?;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_bytes.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(&header_bytes).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&body);
    Ok(out)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

/// Parses and verifies the header, returning it with the body start offset.
pub(crate) fn decode_header(bytes: &[u8], path: &Path) -> Result<(FileHeader, usize), DvError> {
    let corrupt =
        |reason: &str| DvError::DataCorruption(format!("{}: {}", path.display(), reason));

    if bytes.len() < PREAMBLE_LEN || &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let format = read_u32(bytes, 4);
    if format != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", format)));
    }
    let header_len = read_u32(bytes, 8) as usize;
    let header_crc = read_u32(bytes, 12);
    let body_start = PREAMBLE_LEN
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| corrupt("truncated header"))?;

    let header_bytes = &bytes[PREAMBLE_LEN..body_start];
    if checksum(header_bytes) != header_crc {
        return Err(corrupt("header checksum mismatch"));
    }
    let header: FileHeader = bincode::deserialize(header_bytes)
        .map_err(|e| DvError::SerializationError(e.to_string()))?;
    Ok((header, body_start))
}

/// Reads only the header of a data file.
pub fn read_header(path: &Path) -> Result<FileHeader, DvError> {
    let bytes = FileBytes::open(path)?;
    decode_header(bytes.as_slice(), path).map(|(header, _)| header)
}

/// Reads the named columns of a data file, verifying chunk checksums.
///
/// # Arguments
/// * `path` - Data file path
/// * `expected_id` - File id the caller believes the file holds
/// * `expected_rows` - Row count recorded for the file in the manifest
/// * `columns` - Columns to decode, `None` for all in file order
///
/// # Returns
/// `Err(DvError::DataCorruption)` if the header or any decoded column
/// disagrees with `expected_id` or `expected_rows`.
pub fn read_columns(
    path: &Path,
    expected_id: FileId,
    expected_rows: u64,
    columns: Option<&[String]>,
) -> Result<ColumnBatch, DvError> {
    let bytes = FileBytes::open(path)?;
    let bytes = bytes.as_slice();
    let (header, body_start) = decode_header(bytes, path)?;

    if header.file_id != expected_id {
        return Err(DvError::DataCorruption(format!(
            "{}: holds file {} instead of {}",
            path.display(),
            header.file_id,
            expected_id
        )));
    }
    if header.row_count != expected_rows {
        return Err(DvError::DataCorruption(format!(
            "{}: holds {} rows, manifest records {}",
            path.display(),
            header.row_count,
            expected_rows
        )));
    }

    let selected: Vec<&ChunkMeta> = match columns {
        None => header.chunks.iter().collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                header
                    .chunks
                    .iter()
                    .find(|c| &c.name == name)
                    .ok_or_else(|| DvError::ColumnNotFound {
                        column: name.clone(),
                    })
            })
            .collect::<Result<_, _>>()?,
    };

    let mut out = Vec::with_capacity(selected.len());
    for chunk in selected {
        let start = body_start + chunk.offset as usize;
        let end = start + chunk.len as usize;
        if end > bytes.len() {
            return Err(DvError::DataCorruption(format!(
                "{}: chunk '{}' truncated",
                path.display(),
                chunk.name
            )));
        }
        let chunk_bytes = &bytes[start..end];
        if checksum(chunk_bytes) != chunk.crc {
            return Err(DvError::DataCorruption(format!(
                "{}: chunk '{}' checksum mismatch",
                path.display(),
                chunk.name
            )));
        }
        let data: ColumnData = bincode::deserialize(chunk_bytes)
            .map_err(|e| DvError::SerializationError(e.to_string()))?;
        if data.len() as u64 != header.row_count {
            return Err(DvError::DataCorruption(format!(
                "{}: chunk '{}' has {} values for {} rows",
                path.display(),
                chunk.name,
                data.len(),
                header.row_count
            )));
        }
        out.push((chunk.name.clone(), data));
    }

    Ok(ColumnBatch {
        row_count: header.row_count,
        columns: out,
    })
}
