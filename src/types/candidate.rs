//! Transient views of directory entries considered for processing.
//!
//! A [`FileCandidate`] is recomputed on every scan; nothing here is persisted.
//! The [`Fingerprint`] is the cheap change-detection proxy for a file's content.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeDelta, Utc};

/// The `(last-modified, size)` pair used to decide whether a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Last modification time of the file.
    pub modified: DateTime<Utc>,
    /// File size in bytes.
    pub size: u64,
}

/// A directory entry as seen by a single scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Path of the entry (absolute when the consumed directory is absolute).
    pub path: PathBuf,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: DateTime<Utc>,

    /// Whether the entry is a plain file (symlinks are resolved).
    pub is_file: bool,

    /// Whether the entry's permissions forbid writing.
    pub readonly: bool,
}

impl FileCandidate {
    /// Stats `path`, following symlinks.
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        Self::from_metadata(path, &metadata)
    }

    /// Builds a candidate from metadata that was already fetched.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(FileCandidate {
            path: path.into(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
            is_file: metadata.is_file(),
            readonly: metadata.permissions().readonly(),
        })
    }

    /// Returns the final path component as UTF-8, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Returns the directory containing this entry.
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Time elapsed since the last modification, relative to `now`.
    ///
    /// Negative when the modification time lies in the future (clock skew).
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.modified
    }

    /// Returns the change-detection fingerprint for this entry.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            modified: self.modified,
            size: self.size,
        }
    }

    /// Whether this entry is a plain file that may be read and renamed.
    pub fn is_processable(&self) -> bool {
        self.is_file && !self.readonly
    }
}

/// Converts a std duration to a chrono delta, saturating on overflow.
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
