//! Write-to-temp-then-rename helpers.
//!
//! The rename is the atomicity boundary: readers either see the previous file
//! (or nothing) under the final name, or the complete new content. A writer
//! killed mid-write leaves only a temp file behind.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::fsync::{fsync_file, fsync_parent};

/// Extension appended to temp files written next to their destination.
pub const TEMP_EXTENSION: &str = "tmp";

/// Writes `bytes` to `path` and fsyncs the file, without any atomicity.
///
/// Existing content is truncated.
pub fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    fsync_file(&file)
}

/// Moves a fully written temp file to `destination` and makes the rename durable.
pub fn commit_rename(temp: &Path, destination: &Path) -> io::Result<()> {
    std::fs::rename(temp, destination)?;
    fsync_parent(destination)?;
    // A temp file in another directory leaves a stale entry there until synced.
    if temp.parent() != destination.parent() {
        fsync_parent(temp)?;
    }
    Ok(())
}

/// Returns the sibling temp path used by [`write_atomic`].
pub fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TEMP_EXTENSION);
    path.with_file_name(name)
}

/// Atomically replaces `path` with `bytes`.
///
/// 1. Write `<path>.tmp` and fsync it
/// 2. Rename onto `path`
/// 3. fsync the directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let temp = sibling_temp_path(path);
    write_synced(&temp, bytes)?;
    commit_rename(&temp, path)
}
