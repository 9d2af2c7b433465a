//! Scheduled polling of a consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::poll::PollConfig;
use crate::consumer::Consumer;

/// Runs a consumer cycle on every tick of a fixed interval.
#[derive(Debug)]
pub struct DirectoryPoller {
    consumer: Arc<Consumer>,
    interval: Duration,
}

impl DirectoryPoller {
    pub fn new(consumer: Arc<Consumer>, config: &PollConfig) -> Self {
        DirectoryPoller {
            consumer,
            interval: config.poll_interval,
        }
    }

    /// Polls until `shutdown` is cancelled. Returns the total number of
    /// dispatched files.
    ///
    /// A running cycle is always allowed to finish; cancellation is only
    /// observed between cycles.
    #[instrument(skip_all, fields(directory = %self.consumer.directory().display()))]
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut total = 0;

        info!(interval_ms = self.interval.as_millis() as u64, "Directory poller started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping directory poller");
                    break;
                }
                _ = ticker.tick() => {
                    total += run_cycle(&self.consumer).await;
                }
            }
        }
        debug!(total, "Directory poller stopped");
        total
    }
}

/// Runs one blocking consumer cycle on the blocking thread pool.
pub(crate) async fn run_cycle(consumer: &Arc<Consumer>) -> usize {
    let consumer = Arc::clone(consumer);
    match tokio::task::spawn_blocking(move || consumer.poll()).await {
        Ok(dispatched) => dispatched,
        Err(e) => {
            error!(error = %e, "Consumer cycle panicked");
            0
        }
    }
}
