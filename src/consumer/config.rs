//! Consumer configuration.
//!
//! # Environment
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `DROPZONE_INPUT` | directory address (`file://...` or a path) | required |
//! | `DROPZONE_CREATE_DIRS` | create the directory if missing | `false` |
//! | `DROPZONE_WIP_SUFFIX` | suffix marking claimed files | `_wip` |
//! | `DROPZONE_FILTER` | filter expression | accept all |
//! | `DROPZONE_QUIET_PERIOD_MS` | quiet period | `0` (disabled) |
//! | `DROPZONE_MODE` | `delete`, `rename-back` or `archive` | `delete` |
//! | `DROPZONE_ARCHIVE_DIR` | archive directory (archive mode) | none |
//! | `DROPZONE_ARCHIVE_DELETE_CLAIMED` | remove the claimed file after archiving | `false` |
//! | `DROPZONE_SORT` | `none`, `name`, `oldest` or `newest` | `none` |
//! | `DROPZONE_MAX_PER_POLL` | dispatch limit per cycle | unlimited |
//! | `DROPZONE_RECURSIVE` | walk subdirectories | `false` |
//! | `DROPZONE_MAX_DEPTH` | traversal depth limit | `32` |
//! | `DROPZONE_RECOVER_CLAIMS` | restore stale claims at startup | `false` |
//! | `DROPZONE_CACHE_FILE` | processed-item snapshot (rename-back mode) | in memory |
//! | `DROPZONE_EVICTION_AGE_SECS` | processed-item eviction age | `43200` |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::sort::SortOrder;
use crate::cache::DEFAULT_EVICTION_AGE;
use crate::spool::location::{LocationError, resolve_location};
use crate::spool::{DEFAULT_WIP_SUFFIX, QuietPeriod, ReleaseMode};

/// Default limit on traversal depth in recursive mode.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Errors in configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Location(#[from] LocationError),
}

/// Everything a [`Consumer`](super::Consumer) needs to know about its directory.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Absolute path of the consumed directory.
    pub directory: PathBuf,

    /// Create the directory at initialization if it does not exist.
    pub create_directory: bool,

    /// Suffix appended to claimed files. Never empty.
    pub wip_suffix: String,

    /// Filter expression (see [`crate::filter::composite`]).
    pub filter: String,

    pub quiet_period: QuietPeriod,

    /// What happens to a file after it was dispatched.
    pub release: ReleaseMode,

    pub sort: SortOrder,

    /// Stop a cycle after this many dispatches.
    pub max_messages_per_poll: Option<usize>,

    /// Walk subdirectories.
    pub recursive: bool,

    /// Deepest subdirectory level visited in recursive mode.
    pub max_depth: usize,

    /// Rename stale claims back at initialization.
    pub recover_claims_on_start: bool,

    /// Age after which processed-item records are evicted.
    pub eviction_age: Duration,

    /// Snapshot file for the processed-item cache. In memory when `None`.
    pub cache_file: Option<PathBuf>,
}

impl ConsumerConfig {
    /// A configuration with defaults for everything but the directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        ConsumerConfig {
            directory: directory.into(),
            create_directory: false,
            wip_suffix: DEFAULT_WIP_SUFFIX.to_string(),
            filter: String::new(),
            quiet_period: QuietPeriod::DISABLED,
            release: ReleaseMode::Delete,
            sort: SortOrder::Unordered,
            max_messages_per_poll: None,
            recursive: false,
            max_depth: DEFAULT_MAX_DEPTH,
            recover_claims_on_start: false,
            eviction_age: DEFAULT_EVICTION_AGE,
            cache_file: None,
        }
    }

    /// Checks the values the builders accept without validation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an empty WIP suffix or one that
    /// contains a path separator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_wip_suffix(&self.wip_suffix).map_err(|reason| ConfigError::Invalid {
            var: "wip_suffix",
            value: self.wip_suffix.clone(),
            reason,
        })
    }

    /// A configuration for the directory at `address` (`file://...` or a path).
    pub fn from_location(address: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(resolve_location(address)?))
    }

    pub fn with_create_directory(mut self, create: bool) -> Self {
        self.create_directory = create;
        self
    }

    pub fn with_wip_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.wip_suffix = suffix.into();
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = expression.into();
        self
    }

    pub fn with_quiet_period(mut self, quiet: Duration) -> Self {
        self.quiet_period = QuietPeriod::new(quiet);
        self
    }

    pub fn with_release(mut self, release: ReleaseMode) -> Self {
        self.release = release;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_max_messages_per_poll(mut self, max: usize) -> Self {
        self.max_messages_per_poll = Some(max);
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_recover_claims_on_start(mut self, recover: bool) -> Self {
        self.recover_claims_on_start = recover;
        self
    }

    pub fn with_eviction_age(mut self, age: Duration) -> Self {
        self.eviction_age = age;
        self
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Reads the configuration from `DROPZONE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup` instead of the process environment.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup("DROPZONE_INPUT").ok_or(ConfigError::Missing("DROPZONE_INPUT"))?;
        let mut config = Self::from_location(&address)?;

        if let Some(create) = parse_var(&lookup, "DROPZONE_CREATE_DIRS", parse_bool)? {
            config.create_directory = create;
        }
        if let Some(suffix) = parse_var(&lookup, "DROPZONE_WIP_SUFFIX", |v| {
            check_wip_suffix(v).map(|()| v.to_string())
        })? {
            config.wip_suffix = suffix;
        }
        if let Some(filter) = lookup("DROPZONE_FILTER") {
            config.filter = filter;
        }
        if let Some(quiet) = parse_var(&lookup, "DROPZONE_QUIET_PERIOD_MS", parse_millis)? {
            config.quiet_period = QuietPeriod::new(quiet);
        }

        let delete_claimed =
            parse_var(&lookup, "DROPZONE_ARCHIVE_DELETE_CLAIMED", parse_bool)?.unwrap_or(false);
        let archive_dir = lookup("DROPZONE_ARCHIVE_DIR");
        if let Some(mode) = lookup("DROPZONE_MODE") {
            config.release = match mode.trim().to_ascii_lowercase().as_str() {
                "delete" => ReleaseMode::Delete,
                "rename-back" | "keep" => ReleaseMode::RenameBack,
                "archive" => {
                    let dir = archive_dir.ok_or(ConfigError::Missing("DROPZONE_ARCHIVE_DIR"))?;
                    ReleaseMode::Archive {
                        directory: resolve_location(&dir)?,
                        delete_claimed,
                    }
                }
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DROPZONE_MODE",
                        value: mode,
                        reason: "expected delete, rename-back or archive".to_string(),
                    });
                }
            };
        }

        if let Some(sort) = parse_var(&lookup, "DROPZONE_SORT", |v| v.parse::<SortOrder>())? {
            config.sort = sort;
        }
        if let Some(max) = parse_var(&lookup, "DROPZONE_MAX_PER_POLL", parse_positive)? {
            config.max_messages_per_poll = Some(max);
        }
        if let Some(recursive) = parse_var(&lookup, "DROPZONE_RECURSIVE", parse_bool)? {
            config.recursive = recursive;
        }
        if let Some(depth) = parse_var(&lookup, "DROPZONE_MAX_DEPTH", parse_positive)? {
            config.max_depth = depth;
        }
        if let Some(recover) = parse_var(&lookup, "DROPZONE_RECOVER_CLAIMS", parse_bool)? {
            config.recover_claims_on_start = recover;
        }
        if let Some(path) = lookup("DROPZONE_CACHE_FILE") {
            config.cache_file = Some(PathBuf::from(path));
        }
        if let Some(age) = parse_var(&lookup, "DROPZONE_EVICTION_AGE_SECS", |v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        })? {
            config.eviction_age = age;
        }

        Ok(config)
    }
}

fn check_wip_suffix(suffix: &str) -> Result<(), String> {
    if suffix.is_empty() || suffix.contains(['/', '\\']) {
        return Err("must be non-empty and contain no path separators".to_string());
    }
    Ok(())
}

/// Looks up `var` and parses it; absent variables yield `None`.
pub(crate) fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => parse(&value)
            .map(Some)
            .map_err(|reason| ConfigError::Invalid { var, value, reason }),
    }
}

pub(crate) fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

pub(crate) fn parse_millis(value: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults() {
        let config = ConsumerConfig::from_env_with(env(&[("DROPZONE_INPUT", "/var/in")])).unwrap();

        assert_eq!(config.directory, PathBuf::from("/var/in"));
        assert_eq!(config.wip_suffix, "_wip");
        assert!(config.filter.is_empty());
        assert!(config.quiet_period.is_disabled());
        assert_eq!(config.release, ReleaseMode::Delete);
        assert_eq!(config.sort, SortOrder::Unordered);
        assert_eq!(config.max_messages_per_poll, None);
        assert!(!config.recursive);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.eviction_age, Duration::from_secs(12 * 3600));
        assert!(config.cache_file.is_none());
    }

    #[test]
    fn input_is_required() {
        let err = ConsumerConfig::from_env_with(env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DROPZONE_INPUT")));
    }

    #[test]
    fn reads_every_variable() {
        let config = ConsumerConfig::from_env_with(env(&[
            ("DROPZONE_INPUT", "file:///var/in"),
            ("DROPZONE_CREATE_DIRS", "yes"),
            ("DROPZONE_WIP_SUFFIX", ".part"),
            ("DROPZONE_FILTER", "SizeGT=100"),
            ("DROPZONE_QUIET_PERIOD_MS", "5000"),
            ("DROPZONE_MODE", "archive"),
            ("DROPZONE_ARCHIVE_DIR", "/var/done"),
            ("DROPZONE_ARCHIVE_DELETE_CLAIMED", "true"),
            ("DROPZONE_SORT", "oldest"),
            ("DROPZONE_MAX_PER_POLL", "10"),
            ("DROPZONE_RECURSIVE", "1"),
            ("DROPZONE_MAX_DEPTH", "4"),
            ("DROPZONE_RECOVER_CLAIMS", "true"),
            ("DROPZONE_CACHE_FILE", "/var/lib/dropzone/cache.json"),
            ("DROPZONE_EVICTION_AGE_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.directory, PathBuf::from("/var/in"));
        assert!(config.create_directory);
        assert_eq!(config.wip_suffix, ".part");
        assert_eq!(config.filter, "SizeGT=100");
        assert_eq!(config.quiet_period.duration(), Duration::from_secs(5));
        assert_eq!(
            config.release,
            ReleaseMode::Archive {
                directory: PathBuf::from("/var/done"),
                delete_claimed: true,
            }
        );
        assert_eq!(config.sort, SortOrder::OldestFirst);
        assert_eq!(config.max_messages_per_poll, Some(10));
        assert!(config.recursive);
        assert_eq!(config.max_depth, 4);
        assert!(config.recover_claims_on_start);
        assert_eq!(
            config.cache_file,
            Some(PathBuf::from("/var/lib/dropzone/cache.json"))
        );
        assert_eq!(config.eviction_age, Duration::from_secs(60));
    }

    #[test]
    fn archive_mode_needs_a_directory() {
        let err = ConsumerConfig::from_env_with(env(&[
            ("DROPZONE_INPUT", "/in"),
            ("DROPZONE_MODE", "archive"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DROPZONE_ARCHIVE_DIR")));
    }

    #[test]
    fn malformed_values_are_errors() {
        for (var, value) in [
            ("DROPZONE_CREATE_DIRS", "maybe"),
            ("DROPZONE_QUIET_PERIOD_MS", "5s"),
            ("DROPZONE_MODE", "shred"),
            ("DROPZONE_SORT", "random"),
            ("DROPZONE_MAX_PER_POLL", "0"),
            ("DROPZONE_WIP_SUFFIX", ""),
            ("DROPZONE_WIP_SUFFIX", "a/b"),
        ] {
            let result = ConsumerConfig::from_env_with(env(&[("DROPZONE_INPUT", "/in"), (var, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{var}={value:?} should be rejected"
            );
        }
    }

    #[test]
    fn builder_suffix_is_validated() {
        assert!(ConsumerConfig::new("/in").validate().is_ok());
        for suffix in ["", "x/y", "x\\y"] {
            let result = ConsumerConfig::new("/in").with_wip_suffix(suffix).validate();
            assert!(
                matches!(result, Err(ConfigError::Invalid { var: "wip_suffix", .. })),
                "{suffix:?} should be rejected"
            );
        }
    }

    #[test]
    fn foreign_schemes_are_rejected() {
        let err =
            ConsumerConfig::from_env_with(env(&[("DROPZONE_INPUT", "ftp://host/in")])).unwrap_err();
        assert!(matches!(err, ConfigError::Location(LocationError::UnsupportedScheme(_))));
    }

    #[test]
    fn builders_override_defaults() {
        let config = ConsumerConfig::new("/in")
            .with_release(ReleaseMode::RenameBack)
            .with_quiet_period(Duration::from_secs(1))
            .with_max_messages_per_poll(3)
            .with_cache_file("/tmp/cache.json");

        assert!(config.release.is_non_deleting());
        assert!(!config.quiet_period.is_disabled());
        assert_eq!(config.max_messages_per_poll, Some(3));
        assert!(config.cache_file.is_some());
    }
}
