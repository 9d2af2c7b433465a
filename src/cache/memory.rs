use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{DEFAULT_EVICTION_AGE, ProcessedItemCache, ProcessedItemRecord, normalize_path};

/// Records held in a map keyed by normalized path.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    records: HashMap<String, ProcessedItemRecord>,
    eviction_age: Duration,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_AGE)
    }
}

impl InMemoryCache {
    pub fn new(eviction_age: Duration) -> Self {
        InMemoryCache {
            records: HashMap::new(),
            eviction_age,
        }
    }

    pub fn eviction_age(&self) -> Duration {
        self.eviction_age
    }

    pub(crate) fn from_records(
        records: impl IntoIterator<Item = ProcessedItemRecord>,
        eviction_age: Duration,
    ) -> Self {
        InMemoryCache {
            records: records.into_iter().map(|r| (r.path.clone(), r)).collect(),
            eviction_age,
        }
    }

    /// Records sorted by path, for stable serialization.
    pub(crate) fn sorted_records(&self) -> Vec<ProcessedItemRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}

impl ProcessedItemCache for InMemoryCache {
    fn get(&self, path: &Path) -> Option<ProcessedItemRecord> {
        self.records.get(&normalize_path(path)).cloned()
    }

    fn upsert(&mut self, record: ProcessedItemRecord) {
        self.records.insert(record.path.clone(), record);
    }

    fn remove(&mut self, path: &Path) -> Option<ProcessedItemRecord> {
        self.records.remove(&normalize_path(path))
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = self.eviction_age;
        let before_len = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now, max_age));
        before_len - self.records.len()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fingerprint;
    use chrono::TimeDelta;

    fn record(path: &str, size: u64, processed_at: DateTime<Utc>) -> ProcessedItemRecord {
        ProcessedItemRecord::new(
            Path::new(path),
            Fingerprint {
                modified: processed_at,
                size,
            },
            processed_at,
        )
    }

    #[test]
    fn upsert_replaces_by_path() {
        let now = Utc::now();
        let mut cache = InMemoryCache::default();
        cache.upsert(record("/in/a", 1, now));
        cache.upsert(record("/in//a", 2, now));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(Path::new("/in/a")).unwrap().size, 2);
    }

    #[test]
    fn eviction_drops_only_stale_records() {
        let now = Utc::now();
        let mut cache = InMemoryCache::default();
        cache.upsert(record("/in/old", 1, now - TimeDelta::hours(13)));
        cache.upsert(record("/in/recent", 1, now - TimeDelta::hours(1)));

        assert_eq!(cache.evict_expired(now), 1);
        assert!(cache.get(Path::new("/in/old")).is_none());
        assert!(cache.get(Path::new("/in/recent")).is_some());
    }

    #[test]
    fn eviction_age_is_configurable() {
        let now = Utc::now();
        let mut cache = InMemoryCache::new(Duration::from_secs(60));
        cache.upsert(record("/in/a", 1, now - TimeDelta::minutes(2)));
        assert_eq!(cache.evict_expired(now), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_returns_the_record() {
        let now = Utc::now();
        let mut cache = InMemoryCache::default();
        cache.upsert(record("/in/a", 7, now));
        assert_eq!(cache.remove(Path::new("/in/a")).map(|r| r.size), Some(7));
        assert!(cache.remove(Path::new("/in/a")).is_none());
    }
}
