//! Event-driven polling: a cycle as soon as a new file has settled.
//!
//! The OS watch only says that *something* appeared. Each batch of creation
//! events is reduced to the created paths (claims excluded), the poller waits
//! until every one of them has been quiet for the consumer's quiet period, and
//! then runs one full cycle. A full cycle rather than per-file processing also
//! picks up anything the watch missed.
//!
//! Files moved into the directory count as created: atomic producers write
//! elsewhere and rename into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::directory::run_cycle;
use super::poll::PollConfig;
use crate::consumer::Consumer;
use crate::spool::{QuietPeriod, is_claimed_path};
use crate::types::FileCandidate;

/// Capacity of the channel between the OS watcher and the poller task.
const EVENT_BUFFER: usize = 256;

/// Errors setting up an event poller.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Without a quiet period a created file would be read while still being written.
    #[error("event-driven polling requires a non-zero quiet period")]
    QuietPeriodRequired,

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Runs consumer cycles in response to file-creation events.
pub struct EventPoller {
    consumer: Arc<Consumer>,
    settle_step: Duration,
    watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
}

impl std::fmt::Debug for EventPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPoller")
            .field("directory", &self.consumer.directory())
            .field("settle_step", &self.settle_step)
            .finish_non_exhaustive()
    }
}

impl EventPoller {
    /// Subscribes to creation events in the consumer's directory.
    ///
    /// # Errors
    ///
    /// Fails if the consumer has no quiet period or the watch cannot be
    /// registered.
    pub fn new(consumer: Arc<Consumer>, config: &PollConfig) -> Result<Self, WatchError> {
        if consumer.config().quiet_period.is_disabled() {
            return Err(WatchError::QuietPeriodRequired);
        }

        let directory = consumer.directory().to_path_buf();
        let watch_error = |source| WatchError::Watch {
            path: directory.clone(),
            source,
        };

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // A full buffer already guarantees an upcoming cycle.
            if tx.try_send(event).is_err() {
                trace!("Watch event dropped");
            }
        })
        .map_err(watch_error)?;

        let mode = if consumer.config().recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&directory, mode).map_err(watch_error)?;

        Ok(EventPoller {
            consumer,
            settle_step: config.settle_step,
            watcher,
            events,
        })
    }

    /// Scans once, then reacts to events until `shutdown` is cancelled.
    /// Returns the total number of dispatched files.
    ///
    /// The OS watch is released when this returns.
    #[instrument(skip_all, fields(directory = %self.consumer.directory().display()))]
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        let EventPoller {
            consumer,
            settle_step,
            watcher,
            mut events,
        } = self;
        let quiet = consumer.config().quiet_period;
        let suffix = consumer.config().wip_suffix.clone();

        info!("Event poller started");
        let mut total = run_cycle(&consumer).await;

        'events: loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(error = %e, "Watch error, waiting for the next event");
                    continue;
                }
                None => {
                    warn!("Watch channel closed");
                    break;
                }
            };

            let created = created_paths(&event, &suffix);
            if created.is_empty() {
                continue;
            }
            debug!(files = created.len(), "Files created");

            for path in &created {
                if !wait_until_settled(path, quiet, settle_step, &shutdown).await {
                    break 'events;
                }
            }
            total += run_cycle(&consumer).await;
        }

        drop(watcher);
        info!(total, "Event poller stopped");
        total
    }
}

/// Paths created (or moved in) by `event`, minus claimed files.
pub fn created_paths(event: &Event, wip_suffix: &str) -> Vec<PathBuf> {
    let created = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => true,
        _ => false,
    };
    if !created {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !is_claimed_path(p, wip_suffix))
        .cloned()
        .collect()
}

/// Sleeps in `step` increments until `path` has been quiet for `quiet`.
///
/// Returns `false` if cancelled. A file that disappears counts as settled;
/// the following cycle simply will not find it.
pub async fn wait_until_settled(
    path: &Path,
    quiet: QuietPeriod,
    step: Duration,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        let Ok(candidate) = FileCandidate::from_path(path) else {
            return true;
        };
        let remaining = quiet.remaining(&candidate, Utc::now());
        if remaining.is_zero() {
            return true;
        }
        trace!(path = %path.display(), remaining_ms = remaining.as_millis() as u64, "Waiting for file to settle");
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(remaining.min(step)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerConfig;
    use crate::test_utils::{RecordingListener, write_aged};
    use notify::event::{AccessKind, CreateKind};
    use tempfile::tempdir;

    fn consumer(dir: &Path, quiet: Duration, listener: &RecordingListener) -> Arc<Consumer> {
        let consumer = Consumer::new(
            ConsumerConfig::new(dir).with_quiet_period(quiet),
            listener.clone(),
        )
        .unwrap();
        consumer.initialize().unwrap();
        consumer.start().unwrap();
        Arc::new(consumer)
    }

    // ─── Event filtering ───

    #[test]
    fn creation_events_yield_unclaimed_paths() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/in/a.dat"))
            .add_path(PathBuf::from("/in/b.dat_wip"));

        assert_eq!(created_paths(&event, "_wip"), [PathBuf::from("/in/a.dat")]);
    }

    #[test]
    fn moved_in_files_count_as_created() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/in/a.dat"));
        assert_eq!(created_paths(&event, "_wip").len(), 1);
    }

    #[test]
    fn other_events_are_ignored() {
        let event = Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/in/a"));
        assert!(created_paths(&event, "_wip").is_empty());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/in/a"));
        assert!(created_paths(&removed, "_wip").is_empty());
    }

    // ─── Settle wait ───

    #[tokio::test]
    async fn settled_file_returns_immediately() {
        let dir = tempdir().unwrap();
        let path = write_aged(&dir.path().join("a"), b"1", Duration::from_secs(10));
        let quiet = QuietPeriod::new(Duration::from_secs(5));

        assert!(wait_until_settled(&path, quiet, Duration::from_secs(60), &CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn missing_file_counts_as_settled() {
        let dir = tempdir().unwrap();
        let quiet = QuietPeriod::new(Duration::from_secs(5));
        assert!(
            wait_until_settled(&dir.path().join("gone"), quiet, Duration::from_millis(10), &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn settle_wait_is_cancellable() {
        let dir = tempdir().unwrap();
        let path = write_aged(&dir.path().join("a"), b"1", Duration::ZERO);
        let quiet = QuietPeriod::new(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { wait_until_settled(&path, quiet, Duration::from_millis(10), &shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn settle_wait_ends_when_the_window_passes() {
        let dir = tempdir().unwrap();
        let path = write_aged(&dir.path().join("a"), b"1", Duration::ZERO);
        let quiet = QuietPeriod::new(Duration::from_millis(100));

        let settled = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until_settled(&path, quiet, Duration::from_millis(20), &CancellationToken::new()),
        )
        .await;
        assert_eq!(settled.ok(), Some(true));
    }

    // ─── Poller ───

    #[tokio::test]
    async fn zero_quiet_period_is_rejected() {
        let dir = tempdir().unwrap();
        let consumer = consumer(dir.path(), Duration::ZERO, &RecordingListener::new());

        let err = EventPoller::new(consumer, &PollConfig::new()).unwrap_err();
        assert!(matches!(err, WatchError::QuietPeriodRequired));
    }

    #[tokio::test]
    async fn missing_directory_cannot_be_watched() {
        let dir = tempdir().unwrap();
        let consumer = Arc::new(
            Consumer::new(
                ConsumerConfig::new(dir.path().join("missing")).with_quiet_period(Duration::from_secs(1)),
                RecordingListener::new(),
            )
            .unwrap(),
        );

        let err = EventPoller::new(consumer, &PollConfig::new()).unwrap_err();
        assert!(matches!(err, WatchError::Watch { .. }));
    }

    #[tokio::test]
    async fn initial_scan_picks_up_existing_files() {
        let dir = tempdir().unwrap();
        write_aged(&dir.path().join("early.dat"), b"1", Duration::from_secs(10));
        let listener = RecordingListener::new();
        let consumer = consumer(dir.path(), Duration::from_secs(1), &listener);

        let poller = EventPoller::new(consumer, &PollConfig::new()).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller.run(shutdown.clone()));

        for _ in 0..100 {
            if listener.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();

        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(listener.names(), ["early.dat"]);
    }
}
