//! Scheduling configuration for the poller tasks.
//!
//! # Polling Strategy
//!
//! - **Poll interval**: 1 second by default (`DROPZONE_POLL_INTERVAL_MS`).
//!   Ticks missed while a cycle runs are skipped, not queued.
//! - **Watching**: with `DROPZONE_WATCH=true` an event poller runs next to
//!   the scheduled one and triggers a cycle as soon as a created file has
//!   settled.
//!
//! # Settle Wait
//!
//! The event poller sleeps in `settle_step` increments (500ms by default,
//! `DROPZONE_SETTLE_STEP_MS`) until a created file has been quiet for the
//! consumer's quiet period, checking for shutdown between steps.

use std::time::Duration;

use crate::consumer::ConfigError;
use crate::consumer::config::{parse_bool, parse_millis, parse_var};

/// Default interval between scheduled cycles (1 second).
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default sleep increment while waiting for a file to settle (500ms).
const DEFAULT_SETTLE_STEP_MS: u64 = 500;

/// Configuration for the poller tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Interval between scheduled cycles.
    pub poll_interval: Duration,

    /// Sleep increment of the settle wait.
    pub settle_step: Duration,

    /// Run an event poller next to the scheduled one.
    pub watch: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    /// Creates a new `PollConfig` with default values.
    pub fn new() -> Self {
        PollConfig {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            settle_step: Duration::from_millis(DEFAULT_SETTLE_STEP_MS),
            watch: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_settle_step(mut self, step: Duration) -> Self {
        self.settle_step = step;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Creates a `PollConfig` from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|var| std::env::var(var).ok())
    }

    /// Reads `DROPZONE_POLL_INTERVAL_MS`, `DROPZONE_SETTLE_STEP_MS` and
    /// `DROPZONE_WATCH` through `lookup`. Absent values use defaults.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();
        let non_zero = |v: &str| {
            parse_millis(v).and_then(|d| {
                if d.is_zero() {
                    Err("must be greater than zero".to_string())
                } else {
                    Ok(d)
                }
            })
        };

        Ok(PollConfig {
            poll_interval: parse_var(&lookup, "DROPZONE_POLL_INTERVAL_MS", non_zero)?
                .unwrap_or(defaults.poll_interval),
            settle_step: parse_var(&lookup, "DROPZONE_SETTLE_STEP_MS", non_zero)?
                .unwrap_or(defaults.settle_step),
            watch: parse_var(&lookup, "DROPZONE_WATCH", parse_bool)?.unwrap_or(defaults.watch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PollConfig::new();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.settle_step, Duration::from_millis(500));
        assert!(!config.watch);
        assert_eq!(PollConfig::from_env_with(|_| None).unwrap(), config);
    }

    #[test]
    fn reads_environment() {
        let config = PollConfig::from_env_with(|var| match var {
            "DROPZONE_POLL_INTERVAL_MS" => Some("250".to_string()),
            "DROPZONE_SETTLE_STEP_MS" => Some("100".to_string()),
            "DROPZONE_WATCH" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.settle_step, Duration::from_millis(100));
        assert!(config.watch);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = PollConfig::from_env_with(|var| {
            (var == "DROPZONE_POLL_INTERVAL_MS").then(|| "0".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
