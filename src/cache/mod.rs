//! Processed-item cache: what a non-deleting consumer has already delivered.
//!
//! When files stay in the directory after processing, each cycle sees them
//! again. The cache remembers the `(modified, size)` fingerprint of every
//! delivered file so that only new or changed files are dispatched.
//!
//! # Eviction
//!
//! Records carry the instant they were last seen. A record not refreshed for
//! longer than the eviction age is dropped, which bounds the cache to files
//! that still exist (or existed recently).

pub mod memory;
pub mod snapshot;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spool::location::absolutize;
use crate::types::Fingerprint;
use crate::types::candidate::to_time_delta;

pub use memory::InMemoryCache;
pub use snapshot::SnapshotCache;

/// Default age after which unrefreshed records are evicted (12 hours).
pub const DEFAULT_EVICTION_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Errors from loading or persisting a cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache file {path} is not a valid snapshot: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache file {path} has schema version {got}, expected {expected}")]
    SchemaMismatch {
        path: PathBuf,
        expected: u32,
        got: u32,
    },
}

/// One delivered file.
///
/// Identity is the normalized path alone: two records for the same path are
/// the same record regardless of fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedItemRecord {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub last_processed_at: DateTime<Utc>,
}

impl PartialEq for ProcessedItemRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ProcessedItemRecord {}

impl std::hash::Hash for ProcessedItemRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl ProcessedItemRecord {
    pub fn new(path: &Path, fingerprint: Fingerprint, processed_at: DateTime<Utc>) -> Self {
        ProcessedItemRecord {
            path: normalize_path(path),
            last_modified: fingerprint.modified,
            size: fingerprint.size,
            last_processed_at: processed_at,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            modified: self.last_modified,
            size: self.size,
        }
    }

    /// True when the file still has the fingerprint it was delivered with.
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint() == *fingerprint
    }

    /// True when the record has not been refreshed within `max_age`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.last_processed_at) > to_time_delta(max_age)
    }
}

/// Cache key for a path: absolute, forward slashes, no doubled separators.
pub fn normalize_path(path: &Path) -> String {
    let absolute = absolutize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut key = absolute.to_string_lossy().replace('\\', "/");
    while key.contains("//") {
        key = key.replace("//", "/");
    }
    key
}

/// Storage for processed-item records.
pub trait ProcessedItemCache: Send + std::fmt::Debug {
    fn get(&self, path: &Path) -> Option<ProcessedItemRecord>;

    /// Inserts or replaces the record for its path.
    fn upsert(&mut self, record: ProcessedItemRecord);

    fn remove(&mut self, path: &Path) -> Option<ProcessedItemRecord>;

    /// Drops records older than the eviction age. Returns how many were dropped.
    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes the current contents durable, if the cache is backed by storage.
    fn persist(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// A cache that never remembers anything. Used in deleting modes, where a
/// delivered file no longer exists to be seen again.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ProcessedItemCache for NoCache {
    fn get(&self, _path: &Path) -> Option<ProcessedItemRecord> {
        None
    }

    fn upsert(&mut self, _record: ProcessedItemRecord) {}

    fn remove(&mut self, _path: &Path) -> Option<ProcessedItemRecord> {
        None
    }

    fn evict_expired(&mut self, _now: DateTime<Utc>) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }
}
