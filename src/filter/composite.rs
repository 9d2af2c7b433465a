//! Filter expressions: `Kind=value` segments joined by [`FILTER_DELIMITER`].
//!
//! ```text
//! SizeGT=100__@@__Regex=.*\.xml
//! ```
//!
//! Every segment must accept a file for the chain to accept it. An empty
//! expression accepts everything.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::predicate::{
    FilePredicate, IsFile, NamePattern, NewerThan, OlderThan, SizeGreaterThan,
    SizeGreaterThanOrEqual, SizeLessThan, SizeLessThanOrEqual, parse_age, parse_size,
};
use crate::types::FileCandidate;

/// Separator between filter segments.
pub const FILTER_DELIMITER: &str = "__@@__";

/// Errors produced while building a filter chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter kind: {0}")]
    UnknownKind(String),

    #[error("filter segment {0:?} is not of the form Kind=value")]
    MalformedSegment(String),

    #[error("invalid value {value:?} for filter {kind}: {reason}")]
    InvalidValue {
        kind: String,
        value: String,
        reason: String,
    },
}

/// Builds a predicate from the value half of a segment.
pub type PredicateFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn FilePredicate>, FilterError> + Send + Sync>;

/// Maps filter kind names to predicate factories.
#[derive(Clone)]
pub struct FilterRegistry {
    factories: BTreeMap<String, PredicateFactory>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FilterRegistry {
    /// A registry with no kinds at all.
    pub fn empty() -> Self {
        FilterRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("SizeGT", |v| {
            Ok(Box::new(SizeGreaterThan(parse_size("SizeGT", v)?)))
        });
        registry.register("SizeGTE", |v| {
            Ok(Box::new(SizeGreaterThanOrEqual(parse_size("SizeGTE", v)?)))
        });
        registry.register("SizeLT", |v| {
            Ok(Box::new(SizeLessThan(parse_size("SizeLT", v)?)))
        });
        registry.register("SizeLTE", |v| {
            Ok(Box::new(SizeLessThanOrEqual(parse_size("SizeLTE", v)?)))
        });
        registry.register("OlderThan", |v| {
            Ok(Box::new(OlderThan(parse_age("OlderThan", v)?)))
        });
        registry.register("NewerThan", |v| {
            Ok(Box::new(NewerThan(parse_age("NewerThan", v)?)))
        });
        registry.register("Regex", |v| {
            NamePattern::new(v)
                .map(|p| Box::new(p) as Box<dyn FilePredicate>)
                .map_err(|e| FilterError::InvalidValue {
                    kind: "Regex".to_string(),
                    value: v.to_string(),
                    reason: e.to_string(),
                })
        });
        registry.register("IsFile", |_| Ok(Box::new(IsFile)));
        registry
    }

    /// Registers (or replaces) a filter kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn FilePredicate>, FilterError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    fn build(&self, kind: &str, value: &str) -> Result<Box<dyn FilePredicate>, FilterError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| FilterError::UnknownKind(kind.to_string()))?;
        factory(value)
    }
}

/// A conjunction of predicates.
#[derive(Debug, Default)]
pub struct FilterChain {
    predicates: Vec<Box<dyn FilePredicate>>,
}

impl FilterChain {
    /// A chain that accepts every file.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn from_predicates(predicates: Vec<Box<dyn FilePredicate>>) -> Self {
        FilterChain { predicates }
    }

    /// Parses an expression against the built-in kinds.
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        Self::parse_with(expression, &FilterRegistry::with_defaults())
    }

    /// Parses an expression against `registry`.
    ///
    /// Blank segments are skipped. The value is everything after the first
    /// `=`, so regex values may themselves contain `=`.
    pub fn parse_with(expression: &str, registry: &FilterRegistry) -> Result<Self, FilterError> {
        let mut predicates = Vec::new();
        for segment in expression.split(FILTER_DELIMITER) {
            if segment.trim().is_empty() {
                continue;
            }
            let (kind, value) = segment
                .split_once('=')
                .ok_or_else(|| FilterError::MalformedSegment(segment.to_string()))?;
            let kind = kind.trim();
            if kind.is_empty() {
                return Err(FilterError::MalformedSegment(segment.to_string()));
            }
            predicates.push(registry.build(kind, value)?);
        }
        Ok(FilterChain { predicates })
    }

    pub fn push(&mut self, predicate: Box<dyn FilePredicate>) {
        self.predicates.push(predicate);
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl FilePredicate for FilterChain {
    fn accept(&self, candidate: &FileCandidate, now: DateTime<Utc>) -> bool {
        self.predicates.iter().all(|p| p.accept(candidate, now))
    }
}
