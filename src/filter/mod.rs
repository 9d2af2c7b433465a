//! File filters: which candidates a consumer is allowed to pick up.

pub mod composite;
pub mod duration;
pub mod predicate;

pub use composite::{FILTER_DELIMITER, FilterChain, FilterError, FilterRegistry, PredicateFactory};
pub use duration::parse_iso_duration;
pub use predicate::{
    AgeBound, FilePredicate, IsFile, NamePattern, NewerThan, OlderThan, SizeGreaterThan,
    SizeGreaterThanOrEqual, SizeLessThan, SizeLessThanOrEqual,
};
