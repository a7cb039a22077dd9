//! Filesystem helpers for the file-backed writers

use std::fs::{self, File};
use std::io;
use std::path::Path;

use super::errors::{PersistError, PersistResult};

/// State of a bucket file before a write session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// The file does not exist yet.
    Missing,
    /// The file exists but holds no data, e.g. after a previous attempt
    /// created it and then failed before writing anything.
    Empty,
    /// The file exists and already holds data.
    NonEmpty,
}

impl BucketState {
    /// Inspects the file at `path`.
    pub fn of(path: &Path) -> io::Result<Self> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.len() == 0 => Ok(BucketState::Empty),
            Ok(_) => Ok(BucketState::NonEmpty),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BucketState::Missing),
            Err(e) => Err(e),
        }
    }

    /// Whether the file has to be created.
    pub fn is_new(&self) -> bool {
        *self == BucketState::Missing
    }

    /// Whether the header row still has to be written.
    pub fn needs_header(&self) -> bool {
        *self != BucketState::NonEmpty
    }
}

/// Creates `dir` and any missing parents. Succeeds if it already exists.
pub fn create_dirs(dir: &Path) -> PersistResult<()> {
    fs::create_dir_all(dir).map_err(|e| {
        PersistError::append_failed(format!("Could not create directory: {}", dir.display()), e)
    })
}

/// Fails unless `dir` is an existing directory that permits writes.
pub fn check_dir_writable(dir: &Path) -> PersistResult<()> {
    let metadata = fs::metadata(dir).map_err(|e| {
        PersistError::append_failed(format!("Could not access directory: {}", dir.display()), e)
    })?;
    if !metadata.is_dir() {
        return Err(PersistError::permission_denied("Not a directory", dir));
    }
    if metadata.permissions().readonly() {
        return Err(PersistError::permission_denied("Missing write permission for directory", dir));
    }
    Ok(())
}

/// Fails unless the existing file at `file` permits writes.
pub fn check_file_writable(file: &Path) -> PersistResult<()> {
    let metadata = fs::metadata(file).map_err(|e| {
        PersistError::append_failed(format!("Could not access file: {}", file.display()), e)
    })?;
    if metadata.permissions().readonly() {
        return Err(PersistError::permission_denied("Missing write permission for file", file));
    }
    Ok(())
}

/// Fsyncs the parent directory of `path`, so that a newly created entry in
/// it survives a crash.
///
/// Directories cannot be opened for syncing on every platform; there this is
/// a no-op.
pub fn fsync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fsync_dir(parent),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
