//! File-backed processed-item cache.
//!
//! The whole cache is one JSON document, replaced atomically by
//! [`persist`](ProcessedItemCache::persist). A missing file is an empty
//! cache; an unreadable or malformed one is an error, so a consumer never
//! silently re-delivers everything after the snapshot is damaged.
//!
//! New records, changed fingerprints and removals are written at the next
//! `persist`. A record re-upserted with an unchanged fingerprint only moves
//! its `last_processed_at`; those refreshes are written once a quarter of
//! the eviction age has passed since the last write, so an idle directory
//! is not rewritten every cycle and still keeps its records alive on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheError, InMemoryCache, ProcessedItemCache, ProcessedItemRecord};
use crate::persistence::write_atomic;
use crate::types::candidate::to_time_delta;

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<ProcessedItemRecord>,
}

/// An [`InMemoryCache`] mirrored to a JSON file.
#[derive(Debug)]
pub struct SnapshotCache {
    path: PathBuf,
    inner: InMemoryCache,
    eviction_age: Duration,
    dirty: bool,
    /// Unchanged records were re-upserted since the last write.
    refreshed: bool,
    saved_at: Option<DateTime<Utc>>,
}

impl SnapshotCache {
    /// Loads the snapshot at `path`, or starts empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>, eviction_age: Duration) -> Result<Self, CacheError> {
        let path = path.into();
        let mut saved_at = None;
        let inner = match std::fs::read(&path) {
            Ok(bytes) => {
                let snapshot: CacheSnapshot =
                    serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                if snapshot.schema_version != SCHEMA_VERSION {
                    return Err(CacheError::SchemaMismatch {
                        path,
                        expected: SCHEMA_VERSION,
                        got: snapshot.schema_version,
                    });
                }
                debug!(path = %path.display(), records = snapshot.records.len(), "Loaded cache snapshot");
                saved_at = Some(snapshot.saved_at);
                InMemoryCache::from_records(snapshot.records, eviction_age)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => InMemoryCache::new(eviction_age),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        Ok(SnapshotCache {
            path,
            inner,
            eviction_age,
            dirty: false,
            refreshed: false,
            saved_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.refreshed
            && self.saved_at.is_none_or(|at| {
                now.signed_duration_since(at) >= to_time_delta(self.eviction_age / 4)
            })
    }
}

impl ProcessedItemCache for SnapshotCache {
    fn get(&self, path: &Path) -> Option<ProcessedItemRecord> {
        self.inner.get(path)
    }

    fn upsert(&mut self, record: ProcessedItemRecord) {
        let unchanged = self
            .inner
            .get(Path::new(&record.path))
            .is_some_and(|previous| previous.matches(&record.fingerprint()));
        if unchanged {
            self.refreshed = true;
        } else {
            self.dirty = true;
        }
        self.inner.upsert(record);
    }

    fn remove(&mut self, path: &Path) -> Option<ProcessedItemRecord> {
        let removed = self.inner.remove(path);
        self.dirty |= removed.is_some();
        removed
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let evicted = self.inner.evict_expired(now);
        self.dirty |= evicted > 0;
        evicted
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn persist(&mut self) -> Result<(), CacheError> {
        let now = Utc::now();
        if !self.dirty && !self.refresh_due(now) {
            return Ok(());
        }
        let snapshot = CacheSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: now,
            records: self.inner.sorted_records(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        self.refreshed = false;
        self.saved_at = Some(now);
        debug!(path = %self.path.display(), records = snapshot.records.len(), "Persisted cache snapshot");
        Ok(())
    }
}
