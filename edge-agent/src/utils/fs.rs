//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! keep state files consistent across crashes by writing through a
//! temporary file that is persisted over the target.

use std::io::Write;
use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists.
pub fn ensure_parent_dir_sync(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all_sync_with_op("creating directory", parent)
}

/// Read a file to string, returning `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("reading", path, e)),
    }
}

/// Atomically replace `path` with `contents`.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dir_sync(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error("creating temp file in", dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| io_error("writing temp file for", path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error("syncing temp file for", path, e))?;
    tmp.persist(path)
        .map_err(|e| io_error("persisting", path, e.error))?;
    Ok(())
}
