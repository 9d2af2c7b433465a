//! Low-level fsync operations for durable claims, releases and writes.
//!
//! Renaming a file only updates a directory entry. Unless the directory is
//! synced as well, a claim or a produced file may revert to its old name after
//! a power loss even though the file contents were synced.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created, renamed or removed in it are durable.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or the fsync call fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Syncs the parent directory of `path`, if it has one.
pub fn fsync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fsync_dir(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn fsync_file_after_write() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join("payload.dat")).unwrap();
        file.write_all(b"payload").unwrap();

        fsync_file(&file).unwrap();
    }

    #[test]
    fn fsync_dir_after_rename() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.txt");
        File::create(&from).unwrap();
        std::fs::rename(&from, dir.path().join("a.txt_wip")).unwrap();

        fsync_dir(dir.path()).unwrap();
    }

    #[test]
    fn fsync_parent_of_relative_name_is_noop() {
        fsync_parent(Path::new("bare-name")).unwrap();
    }

    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        let result = fsync_dir(Path::new("/nonexistent/dropzone/inbox"));
        assert!(result.is_err());
    }
}
