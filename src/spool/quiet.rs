//! Quiet-period gate: is a file still being written?
//!
//! A file is settled once it has not been modified for the quiet duration.
//! This is a heuristic. A writer that pauses for longer than the window
//! mid-write is indistinguishable from a finished one.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::FileCandidate;
use crate::types::candidate::to_time_delta;

/// Minimum age since last modification before a file may be claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuietPeriod(Duration);

impl QuietPeriod {
    /// A quiet period that accepts every file.
    pub const DISABLED: QuietPeriod = QuietPeriod(Duration::ZERO);

    pub fn new(duration: Duration) -> Self {
        QuietPeriod(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `true` when `now - candidate.modified >= quiet period`.
    pub fn is_settled(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> bool {
        self.is_disabled() || candidate.age(now) >= to_time_delta(self.0)
    }

    /// How much longer the candidate must stay untouched to be settled.
    pub fn remaining(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> Duration {
        if self.is_settled(candidate, now) {
            return Duration::ZERO;
        }
        let left = to_time_delta(self.0) - candidate.age(now);
        left.to_std().unwrap_or(self.0)
    }
}

impl From<Duration> for QuietPeriod {
    fn from(duration: Duration) -> Self {
        QuietPeriod(duration)
    }
}
