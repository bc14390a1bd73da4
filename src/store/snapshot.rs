//! Durable CSV snapshot helpers
//!
//! Every snapshot is a full overwrite. The new content is written to a sibling
//! `.tmp` file and renamed over the target, so a crash mid-write leaves the
//! previous snapshot intact.

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or writing a snapshot
///
/// These are fatal for a run: once a snapshot cannot be written the
/// crash-recovery guarantee no longer holds.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Malformed snapshot {}: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },
}

impl SnapshotError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Writes a CSV file atomically (write to temp, then rename)
pub(crate) fn write_csv_atomic<F>(path: &Path, write: F) -> SnapshotResult<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<(), csv::Error>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
        }
    }

    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).map_err(|e| SnapshotError::io(&tmp, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    write(&mut writer).map_err(|e| SnapshotError::csv(path, e))?;
    writer.flush().map_err(|e| SnapshotError::io(&tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| SnapshotError::io(&tmp, e))?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|e| SnapshotError::io(path, e))?;
    Ok(())
}

/// Opens a CSV snapshot for reading, with a header row
pub(crate) fn open_csv(path: &Path) -> SnapshotResult<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| SnapshotError::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

/// Removes a snapshot file, ignoring a missing file
pub fn remove_snapshot(path: &Path) -> SnapshotResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::io(path, e)),
    }
}
