//! The consumer: one directory, one cache, one cycle at a time.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use super::config::{ConfigError, ConsumerConfig};
use super::listener::{DispatchError, Listener};
use super::traverse::collect_tree;
use crate::cache::{
    CacheError, InMemoryCache, NoCache, ProcessedItemCache, ProcessedItemRecord, SnapshotCache,
};
use crate::filter::{FilePredicate, FilterChain, FilterError, FilterRegistry};
use crate::spool::{
    ClaimError, ClaimedFile, FileIo, LocalFs, ReleaseMode, claim, is_claimed_path,
    recover_stale_claims, release, rename_back,
};
use crate::types::{FileCandidate, Message, attributes};

/// Lifecycle of a consumer.
///
/// ```text
/// Stopped -> Initialized -> Started -> (Polling <-> Idle) -> Stopping -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Initialized,
    Started,
    Polling,
    Idle,
    Stopping,
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors that stop a consumer from being built, initialized or stopped.
///
/// Nothing that happens during a cycle is reported here; see [`Consumer::poll`].
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("directory {0} does not exist")]
    DirectoryMissing(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("directory {0} is not writable")]
    NotWritable(PathBuf),

    #[error("cannot create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stale claim recovery failed: {0}")]
    Recovery(#[from] ClaimError),

    #[error("cannot {action} a consumer in state {state}")]
    InvalidState {
        state: ConsumerState,
        action: &'static str,
    },
}

/// Why one file failed within a cycle.
#[derive(Debug, Error)]
enum FileError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// State guarded by the single-flight lock.
#[derive(Debug)]
struct CycleState {
    cache: Box<dyn ProcessedItemCache>,
    /// Fingerprints seen during the running cycle, merged into the cache at its end.
    working_set: HashMap<String, ProcessedItemRecord>,
}

/// Turns files in a directory into messages for a [`Listener`].
///
/// `poll` may be called concurrently from a scheduled poller and a watcher;
/// calls are serialized so that at most one cycle runs at a time.
pub struct Consumer {
    config: ConsumerConfig,
    filter: FilterChain,
    io: Arc<dyn FileIo>,
    listener: Arc<dyn Listener>,
    state: Mutex<ConsumerState>,
    cycle: Mutex<CycleState>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("directory", &self.config.directory)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A listener that panicked mid-cycle leaves the lock poisoned; the guarded
    // state is still consistent because every write to it is a single call.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Consumer {
    /// Builds a consumer with the built-in filter kinds.
    ///
    /// # Errors
    ///
    /// Fails on an invalid WIP suffix, a malformed filter expression or an
    /// unreadable cache snapshot.
    pub fn new(config: ConsumerConfig, listener: impl Listener + 'static) -> Result<Self, ConsumerError> {
        Self::with_registry(config, &FilterRegistry::with_defaults(), listener)
    }

    /// Builds a consumer whose filter expression may use kinds from `registry`.
    pub fn with_registry(
        config: ConsumerConfig,
        registry: &FilterRegistry,
        listener: impl Listener + 'static,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        let filter = FilterChain::parse_with(&config.filter, registry)?;

        let cache: Box<dyn ProcessedItemCache> = if !config.release.is_non_deleting() {
            Box::new(NoCache)
        } else if let Some(path) = &config.cache_file {
            Box::new(SnapshotCache::open(path, config.eviction_age)?)
        } else {
            Box::new(InMemoryCache::new(config.eviction_age))
        };

        Ok(Consumer {
            config,
            filter,
            io: Arc::new(LocalFs),
            listener: Arc::new(listener),
            state: Mutex::new(ConsumerState::Stopped),
            cycle: Mutex::new(CycleState {
                cache,
                working_set: HashMap::new(),
            }),
        })
    }

    /// Replaces the file I/O implementation.
    pub fn with_io(mut self, io: Arc<dyn FileIo>) -> Self {
        self.io = io;
        self
    }

    /// Replaces the processed-item cache.
    pub fn with_cache(self, cache: Box<dyn ProcessedItemCache>) -> Self {
        lock(&self.cycle).cache = cache;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn state(&self) -> ConsumerState {
        *lock(&self.state)
    }

    /// Number of records in the processed-item cache.
    pub fn cached_records(&self) -> usize {
        lock(&self.cycle).cache.len()
    }

    fn transition(
        &self,
        from: &[ConsumerState],
        to: ConsumerState,
        action: &'static str,
    ) -> Result<(), ConsumerError> {
        let mut state = lock(&self.state);
        if !from.contains(&state) {
            return Err(ConsumerError::InvalidState {
                state: *state,
                action,
            });
        }
        *state = to;
        Ok(())
    }

    /// Validates the directory and prepares the consumer for its first cycle.
    ///
    /// The directory must exist (or be created when configured to) and be
    /// writable, since claims rename files inside it.
    #[instrument(skip(self), fields(directory = %self.config.directory.display()))]
    pub fn initialize(&self) -> Result<(), ConsumerError> {
        let current = self.state();
        if current != ConsumerState::Stopped {
            return Err(ConsumerError::InvalidState {
                state: current,
                action: "initialize",
            });
        }

        let dir = &self.config.directory;
        if !self.io.exists(dir) {
            if !self.config.create_directory {
                return Err(ConsumerError::DirectoryMissing(dir.clone()));
            }
            self.io
                .create_dir_all(dir)
                .map_err(|source| ConsumerError::CreateDirectory {
                    path: dir.clone(),
                    source,
                })?;
            info!("Created consumed directory");
        }

        match self.io.stat(dir) {
            Ok(entry) if !entry.is_file => {}
            _ => return Err(ConsumerError::NotADirectory(dir.clone())),
        }
        if !self.io.is_writable_dir(dir) {
            return Err(ConsumerError::NotWritable(dir.clone()));
        }

        if self.config.recover_claims_on_start {
            let restored = recover_stale_claims(self.io.as_ref(), dir, &self.config.wip_suffix)?;
            if restored > 0 {
                info!(restored, "Restored stale claims");
            }
        }

        self.transition(&[ConsumerState::Stopped], ConsumerState::Initialized, "initialize")?;
        info!(
            mode = ?self.config.release,
            filters = self.filter.len(),
            "Consumer initialized"
        );
        Ok(())
    }

    /// Allows cycles to run.
    pub fn start(&self) -> Result<(), ConsumerError> {
        self.transition(&[ConsumerState::Initialized], ConsumerState::Started, "start")?;
        debug!(directory = %self.config.directory.display(), "Consumer started");
        Ok(())
    }

    /// Stops the consumer after any running cycle completes and persists the cache.
    ///
    /// A stopped consumer cannot be restarted.
    #[instrument(skip(self), fields(directory = %self.config.directory.display()))]
    pub fn stop(&self) -> Result<(), ConsumerError> {
        {
            let mut state = lock(&self.state);
            match *state {
                ConsumerState::Closed => return Ok(()),
                ConsumerState::Stopping => {
                    return Err(ConsumerError::InvalidState {
                        state: *state,
                        action: "stop",
                    });
                }
                _ => *state = ConsumerState::Stopping,
            }
        }

        // Waits for an in-flight cycle.
        let result = lock(&self.cycle).cache.persist();
        *lock(&self.state) = ConsumerState::Closed;
        info!("Consumer stopped");
        result.map_err(ConsumerError::from)
    }

    /// Runs one scan-and-process cycle and returns how many files were dispatched.
    ///
    /// Never fails: a listing failure yields 0, and a failing file is logged
    /// and skipped. Blocks while another cycle is running.
    pub fn poll(&self) -> usize {
        let mut cycle = lock(&self.cycle);

        if self
            .transition(
                &[ConsumerState::Started, ConsumerState::Idle],
                ConsumerState::Polling,
                "poll",
            )
            .is_err()
        {
            trace!(state = %self.state(), "Consumer not started, skipping cycle");
            return 0;
        }

        let now = Utc::now();
        let dispatched = match self.collect_candidates(now) {
            Ok(candidates) => self.process_candidates(candidates, now, &mut cycle),
            Err(e) => {
                warn!(
                    directory = %self.config.directory.display(),
                    error = %e,
                    "Failed to list directory, retrying next cycle"
                );
                0
            }
        };

        self.finish_cycle(&mut cycle, now);

        // stop() may have moved us to Stopping meanwhile.
        let _ = self.transition(&[ConsumerState::Polling], ConsumerState::Idle, "finish");
        if dispatched > 0 {
            debug!(dispatched, "Cycle complete");
        }
        dispatched
    }

    /// Lists, filters and orders the files eligible for this cycle.
    fn collect_candidates(&self, now: DateTime<Utc>) -> io::Result<Vec<FileCandidate>> {
        let suffix = &self.config.wip_suffix;

        let groups = if self.config.recursive {
            let skip = match &self.config.release {
                ReleaseMode::Archive { directory, .. } => Some(directory.as_path()),
                _ => None,
            };
            collect_tree(&self.config.directory, self.config.max_depth, suffix, skip)?
                .into_iter()
                .map(|g| g.files)
                .collect()
        } else {
            let mut files = Vec::new();
            for path in self.io.list_dir(&self.config.directory)? {
                if is_claimed_path(&path, suffix) {
                    continue;
                }
                match self.io.stat(&path) {
                    Ok(candidate) => files.push(candidate),
                    Err(e) => debug!(path = %path.display(), error = %e, "Entry vanished during scan"),
                }
            }
            vec![files]
        };

        let mut ordered = Vec::new();
        for mut files in groups {
            files.retain(|c| self.filter.accept(c, now));
            self.config.sort.apply(&mut files);
            ordered.extend(files);
        }
        Ok(ordered)
    }

    fn process_candidates(
        &self,
        candidates: Vec<FileCandidate>,
        now: DateTime<Utc>,
        cycle: &mut CycleState,
    ) -> usize {
        let mut dispatched = 0;
        for candidate in candidates {
            if let Some(max) = self.config.max_messages_per_poll
                && dispatched >= max
            {
                debug!(max, "Reached per-cycle message limit");
                break;
            }

            match self.process_file(&candidate, now, cycle) {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    path = %candidate.path.display(),
                    error = %e,
                    "Failed to process file"
                ),
            }
        }
        dispatched
    }

    /// Returns whether the file was dispatched.
    fn process_file(
        &self,
        candidate: &FileCandidate,
        now: DateTime<Utc>,
        cycle: &mut CycleState,
    ) -> Result<bool, FileError> {
        if !self.config.quiet_period.is_settled(candidate, now) {
            trace!(
                path = %candidate.path.display(),
                remaining_ms = self.config.quiet_period.remaining(candidate, now).as_millis() as u64,
                "File not settled yet"
            );
            return Ok(false);
        }
        if !candidate.is_processable() {
            trace!(path = %candidate.path.display(), "Not a writable plain file");
            return Ok(false);
        }

        if !self.config.release.is_non_deleting() {
            self.claim_and_dispatch(candidate)?;
            return Ok(true);
        }

        let fingerprint = candidate.fingerprint();
        let record = ProcessedItemRecord::new(&candidate.path, fingerprint, now);
        let key = record.path.clone();
        let unchanged = cycle
            .cache
            .get(&candidate.path)
            .is_some_and(|previous| previous.matches(&fingerprint));
        cycle.working_set.insert(key.clone(), record);

        if unchanged {
            trace!(path = %candidate.path.display(), "Already processed");
            return Ok(false);
        }

        match self.claim_and_dispatch(candidate) {
            Ok(()) => Ok(true),
            Err(e) => {
                cycle.working_set.remove(&key);
                Err(e)
            }
        }
    }

    fn claim_and_dispatch(&self, candidate: &FileCandidate) -> Result<(), FileError> {
        let io = self.io.as_ref();
        let claimed = claim(io, &candidate.path, &self.config.wip_suffix, Utc::now())?;

        if let Err(e) = self.dispatch(candidate, &claimed) {
            if self.config.release.is_non_deleting() {
                if let Err(restore) = rename_back(io, &claimed) {
                    error!(
                        claimed = %claimed.claimed_path().display(),
                        error = %restore,
                        "Could not restore claimed file after failure"
                    );
                }
            } else {
                error!(
                    claimed = %claimed.claimed_path().display(),
                    "Dispatch failed, claimed file left in place for manual intervention"
                );
            }
            return Err(e);
        }

        match release(io, &claimed, &self.config.release) {
            Ok(Some(destination)) => {
                debug!(path = %candidate.path.display(), to = %destination.display(), "Released file")
            }
            Ok(None) => debug!(path = %candidate.path.display(), "Deleted file"),
            // The message went out; only the cleanup failed.
            Err(e) => error!(
                claimed = %claimed.claimed_path().display(),
                error = %e,
                "Dispatched file could not be released"
            ),
        }
        Ok(())
    }

    fn dispatch(&self, candidate: &FileCandidate, claimed: &ClaimedFile) -> Result<(), FileError> {
        let payload = self
            .io
            .read_all(claimed.claimed_path())
            .map_err(|source| FileError::Read {
                path: claimed.claimed_path().to_path_buf(),
                source,
            })?;
        let message = self.build_message(candidate, claimed, payload);
        trace!(%message, "Dispatching");
        self.listener.on_message(message)?;
        Ok(())
    }

    fn build_message(&self, candidate: &FileCandidate, claimed: &ClaimedFile, payload: Vec<u8>) -> Message {
        let directory = candidate
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Message::new(payload)
            .with_attribute(attributes::ORIGINAL_FILENAME, claimed.original_name())
            .with_attribute(attributes::ORIGINAL_DIRECTORY, directory)
            .with_attribute(
                attributes::FILE_LAST_MODIFIED,
                candidate.modified.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with_attribute(attributes::FILE_SIZE, candidate.size)
            .with_attribute(
                attributes::CONSUME_LOCATION,
                self.config.directory.display(),
            )
    }

    /// Merges the working set, evicts stale records and persists the cache.
    /// Cache problems are logged and never fail the cycle.
    fn finish_cycle(&self, cycle: &mut CycleState, now: DateTime<Utc>) {
        for (_, record) in cycle.working_set.drain() {
            cycle.cache.upsert(record);
        }
        let evicted = cycle.cache.evict_expired(now);
        if evicted > 0 {
            debug!(evicted, "Evicted processed-item records");
        }
        if let Err(e) = cycle.cache.persist() {
            warn!(error = %e, "Failed to persist processed-item cache");
        }
    }
}
