//! I/O utilities for artifact and manifest persistence.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::error::DvError;

/// Classifies I/O errors into specific DvError variants.
pub fn classify_io_error(error: std::io::Error, context: &str) -> DvError {
    match error.kind() {
        ErrorKind::StorageFull | ErrorKind::OutOfMemory => {
            DvError::DiskFull(format!("{}: {}", context, error))
        }
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            DvError::TransientIoError(format!("{}: {}", context, error))
        }
        _ => DvError::IoError(format!("{}: {}", context, error)),
    }
}

/// Retries an operation that may fail with transient I/O errors.
pub fn retry_io_operation<F, T>(
    operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, DvError>
where
    F: Fn() -> Result<T, DvError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(err);
                }

                // Only retry transient I/O errors
                if let DvError::TransientIoError(_) = err {
                    tracing::warn!(
                        "Transient I/O error in {} (attempt {}/{}): {}",
                        context,
                        attempt,
                        max_retries,
                        err
                    );

                    if retry_delay_ms > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                    }

                    continue;
                }

                return Err(err);
            }
        }
    }
}

/// Writes `bytes` to `path` only if nothing exists there yet.
///
/// Returns `Ok(false)` when the path is already taken. A file this call
/// created is removed again if writing it fails, so a retry can claim the
/// same path.
pub fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<bool, DvError> {
    write_exclusive_with(path, |file| {
        file.write_all(bytes)
            .map_err(|e| classify_io_error(e, "Failed to write file"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync file"))
    })
}

fn write_exclusive_with<F>(path: &Path, fill: F) -> Result<bool, DvError>
where
    F: FnOnce(&mut File) -> Result<(), DvError>,
{
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(classify_io_error(e, "Failed to create file")),
    };

    if let Err(err) = fill(&mut file) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(true)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Publishes `bytes` at `path` all at once, only if nothing exists there yet.
///
/// The content is written and synced under a private temp name, then
/// hard-linked into place, so readers never observe a partial file.
///
/// # Returns
/// `Ok(false)` when another writer already published `path`.
pub fn publish_exclusive(path: &Path, bytes: &[u8]) -> Result<bool, DvError> {
    let temp_path = path.with_extension(format!(
        "{}-{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
    ));

    let result = (|| {
        let mut file = File::create(&temp_path)
            .map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
        file.write_all(bytes)
            .map_err(|e| classify_io_error(e, "Failed to write temp file"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync temp file"))?;

        match fs::hard_link(&temp_path, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(classify_io_error(e, "Failed to publish file")),
        }
    })();

    let _ = fs::remove_file(&temp_path);
    result
}

/// Computes the CRC32 of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
