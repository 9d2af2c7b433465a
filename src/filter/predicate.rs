//! Leaf predicates over file metadata.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::FilterError;
use super::duration::parse_iso_duration;
use crate::types::FileCandidate;
use crate::types::candidate::to_time_delta;

/// A yes/no decision about a candidate file.
///
/// `now` is passed in so that one scan evaluates every age predicate against
/// the same instant.
pub trait FilePredicate: Send + Sync + fmt::Debug {
    fn accept(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGreaterThan(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGreaterThanOrEqual(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLessThan(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLessThanOrEqual(pub u64);

impl FilePredicate for SizeGreaterThan {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.size > self.0
    }
}

impl FilePredicate for SizeGreaterThanOrEqual {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.size >= self.0
    }
}

impl FilePredicate for SizeLessThan {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.size < self.0
    }
}

impl FilePredicate for SizeLessThanOrEqual {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.size <= self.0
    }
}

/// Reference point for the age predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBound {
    /// A duration before the evaluation instant.
    Relative(Duration),
    /// A fixed instant.
    Absolute(DateTime<Utc>),
}

impl AgeBound {
    /// Parses either an epoch-millisecond integer or an ISO-8601 duration.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if let Ok(millis) = value.parse::<i64>() {
            return DateTime::from_timestamp_millis(millis)
                .map(AgeBound::Absolute)
                .ok_or_else(|| format!("epoch milliseconds out of range: {millis}"));
        }
        parse_iso_duration(value)
            .map(AgeBound::Relative)
            .ok_or_else(|| {
                "expected epoch milliseconds or an ISO-8601 duration such as PT30M".to_string()
            })
    }

    /// The instant this bound refers to when evaluated at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            AgeBound::Relative(duration) => now
                .checked_sub_signed(to_time_delta(*duration))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            AgeBound::Absolute(instant) => *instant,
        }
    }
}

/// Accepts files last modified before the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OlderThan(pub AgeBound);

/// Accepts files last modified after the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewerThan(pub AgeBound);

impl FilePredicate for OlderThan {
    fn accept(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> bool {
        candidate.modified < self.0.cutoff(now)
    }
}

impl FilePredicate for NewerThan {
    fn accept(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> bool {
        candidate.modified > self.0.cutoff(now)
    }
}

/// Accepts files whose whole name matches a regular expression.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compiles `pattern`, anchored at both ends of the file name.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(NamePattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FilePredicate for NamePattern {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.file_name().is_some_and(|n| self.regex.is_match(n))
    }
}

/// Accepts plain files only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsFile;

impl FilePredicate for IsFile {
    fn accept(&self, candidate: &FileCandidate, _now: DateTime<Utc>) -> bool {
        candidate.is_file
    }
}

pub(crate) fn parse_size(kind: &str, value: &str) -> Result<u64, FilterError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| FilterError::InvalidValue {
            kind: kind.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

pub(crate) fn parse_age(kind: &str, value: &str) -> Result<AgeBound, FilterError> {
    AgeBound::parse(value).map_err(|reason| FilterError::InvalidValue {
        kind: kind.to_string(),
        value: value.to_string(),
        reason,
    })
}
