//! Poller tasks that drive consumers.
//!
//! A consumer does nothing on its own; these tasks call its cycle:
//!
//! - [`DirectoryPoller`] on a fixed interval
//! - [`EventPoller`] whenever a created file has settled
//!
//! Both may run against the same consumer. Their cycles never overlap because
//! the consumer serializes them. Each cycle runs on the blocking thread pool.
//!
//! # Module Structure
//!
//! - [`poll`]: interval and settle-step configuration
//! - [`directory`]: the scheduled poller
//! - [`watch`]: the event poller

pub mod directory;
pub mod poll;
pub mod watch;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::consumer::Consumer;

pub use directory::DirectoryPoller;
pub use poll::PollConfig;
pub use watch::{EventPoller, WatchError, created_paths, wait_until_settled};

/// Spawns the scheduled poller and, if configured, an event poller for `consumer`.
///
/// Each handle resolves to the number of files its task dispatched.
///
/// # Errors
///
/// Fails if watching is enabled but cannot be set up. Nothing is spawned in
/// that case.
pub fn spawn_pollers(
    consumer: Arc<Consumer>,
    config: &PollConfig,
    shutdown: &CancellationToken,
) -> Result<Vec<JoinHandle<usize>>, WatchError> {
    let watcher = if config.watch {
        Some(EventPoller::new(Arc::clone(&consumer), config)?)
    } else {
        None
    };

    let mut handles = vec![tokio::spawn(
        DirectoryPoller::new(consumer, config).run(shutdown.clone()),
    )];
    if let Some(watcher) = watcher {
        handles.push(tokio::spawn(watcher.run(shutdown.clone())));
    }
    Ok(handles)
}
