//! Byte-level file I/O used by consumers and producers.
//!
//! Everything that touches the filesystem on the claim/read/release path goes
//! through [`FileIo`] so tests can substitute failures (an unreadable listing,
//! a rename that fails) without needing real permission tricks.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::persistence::atomic::{commit_rename, write_synced};
use crate::persistence::fsync::fsync_parent;
use crate::types::FileCandidate;

/// Filesystem operations needed by the ingestion and delivery engine.
pub trait FileIo: Send + Sync + fmt::Debug {
    /// Lists the entries of a directory (not recursive, unsorted).
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Stats a single entry, following symlinks.
    fn stat(&self, path: &Path) -> io::Result<FileCandidate>;

    /// Reads a whole file.
    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Writes a whole file and syncs it.
    fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Deletes a file.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Renames `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Renames `from` to `to`, failing with [`io::ErrorKind::AlreadyExists`]
    /// if `to` exists.
    ///
    /// The existence check and the rename are two calls; exclusivity holds
    /// only while a single process owns the directory.
    fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.exists(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        self.rename(from, to)
    }

    /// Copies a file, preserving its permissions and modification time.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Whether `dir` is a directory this process can create and remove files in.
    fn is_writable_dir(&self, dir: &Path) -> bool;
}

/// [`FileIo`] backed by the local filesystem, with durable renames.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileIo for LocalFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }

    fn stat(&self, path: &Path) -> io::Result<FileCandidate> {
        FileCandidate::from_path(path)
    }

    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        write_synced(path, bytes)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)?;
        fsync_parent(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        commit_rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to)?;
        let modified = std::fs::metadata(from)?.modified()?;
        let copied = File::options().write(true).open(to)?;
        copied.set_modified(modified)?;
        copied.sync_all()?;
        fsync_parent(to)
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)
    }

    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling symlink still counts as taken
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_writable_dir(&self, dir: &Path) -> bool {
        if !dir.is_dir() {
            return false;
        }
        let probe = dir.join(format!(".dropzone-probe-{}", uuid::Uuid::new_v4()));
        match File::create(&probe) {
            Ok(file) => {
                drop(file);
                std::fs::remove_file(&probe).is_ok()
            }
            Err(_) => false,
        }
    }
}
