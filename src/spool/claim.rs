//! Claiming files for exclusive processing by renaming them.
//!
//! ```text
//! <name>                      - waiting in the consumed directory
//! <name><suffix>              - claimed (work in progress)
//! <epochMillis>.<name><suffix> - claimed while a stale claim of <name> existed
//! ```
//!
//! Once renamed, the original name no longer exists, so no later cycle of the
//! same process can claim it again. A claim ends in one of three ways, chosen
//! by [`ReleaseMode`]: the file is deleted, renamed back, or copied into an
//! archive directory.
//!
//! # Collisions
//!
//! A claimed name that already exists means a previous run crashed while
//! holding a claim. The stale file is never overwritten; the new claim gets an
//! epoch-millisecond prefix instead.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::io::FileIo;

/// Default suffix marking a claimed file.
pub const DEFAULT_WIP_SUFFIX: &str = "_wip";

/// How many epoch-prefixed names are tried before giving up on a claim.
const MAX_COLLISION_ATTEMPTS: i64 = 16;

static COLLISION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{13,}\.(.+)$").expect("collision prefix pattern is valid")
});

/// Errors that can occur while claiming or releasing a file.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// A rename, copy or delete failed.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file name is missing or not valid UTF-8.
    #[error("cannot claim {0}: file name is missing or not valid UTF-8")]
    InvalidName(PathBuf),

    /// Every collision fallback name was taken.
    #[error("no free work-in-progress name for {0}")]
    Exhausted(PathBuf),

    /// Renaming back would overwrite a file that appeared under the original name.
    #[error("cannot restore {claimed}: {original} exists again")]
    OriginalReappeared { claimed: PathBuf, original: PathBuf },
}

/// Result type for claim operations.
pub type Result<T> = std::result::Result<T, ClaimError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ClaimError + '_ {
    move |source| ClaimError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happens to a claimed file after it has been dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Delete the claimed file.
    Delete,

    /// Rename the claimed file back to its original name. Consumers in this
    /// mode leave files in place and rely on the processed-item cache.
    ///
    /// The file is still claimed while its message is dispatched, so it is
    /// absent from its original name until the rename back. Other readers
    /// of the directory must tolerate that window.
    RenameBack,

    /// Copy the claimed file into `directory` under its original name.
    Archive {
        directory: PathBuf,
        /// Remove the claimed file after copying it.
        delete_claimed: bool,
    },
}

impl ReleaseMode {
    /// Whether consumed files stay in the consumed directory.
    pub fn is_non_deleting(&self) -> bool {
        matches!(self, ReleaseMode::RenameBack)
    }
}

/// A file renamed to a work-in-progress name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFile {
    original: PathBuf,
    claimed: PathBuf,
}

impl ClaimedFile {
    /// The path the file had before it was claimed.
    pub fn original_path(&self) -> &Path {
        &self.original
    }

    /// The path the file has while claimed.
    pub fn claimed_path(&self) -> &Path {
        &self.claimed
    }

    /// The original file name.
    pub fn original_name(&self) -> &str {
        self.original
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Returns `<name><suffix>`.
pub fn wip_name(name: &str, suffix: &str) -> String {
    format!("{name}{suffix}")
}

/// Returns `<epochMillis>.<name><suffix>`.
pub fn collision_name(name: &str, suffix: &str, epoch_millis: i64) -> String {
    format!("{epoch_millis}.{name}{suffix}")
}

/// Whether `name` carries the work-in-progress suffix.
pub fn is_claimed_name(name: &str, suffix: &str) -> bool {
    !suffix.is_empty() && name.ends_with(suffix)
}

/// Whether the final component of `path` carries the work-in-progress suffix.
///
/// Names that are not valid UTF-8 are compared lossily.
pub fn is_claimed_path(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .is_some_and(|n| is_claimed_name(&n.to_string_lossy(), suffix))
}

/// Returns the name a collision claim was taken for, with the
/// `<epochMillis>.` prefix removed.
///
/// Expects a name whose suffix was already stripped.
pub fn strip_collision_prefix(name: &str) -> Option<&str> {
    COLLISION_PREFIX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Removes the suffix from a claimed name by literal (not pattern) matching.
///
/// Returns `None` if the name does not end with the suffix or nothing would remain.
pub fn strip_wip_suffix<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    if suffix.is_empty() {
        return None;
    }
    name.strip_suffix(suffix).filter(|rest| !rest.is_empty())
}

/// Claims `path` by renaming it to its work-in-progress name.
///
/// # Errors
///
/// Returns `ClaimError::Io` if the rename fails for any reason other than the
/// target already existing, and `ClaimError::Exhausted` if every fallback name
/// is taken too.
pub fn claim(io: &dyn FileIo, path: &Path, suffix: &str, now: DateTime<Utc>) -> Result<ClaimedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClaimError::InvalidName(path.to_path_buf()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    let target = dir.join(wip_name(name, suffix));
    match io.rename_no_replace(path, &target) {
        Ok(()) => {
            debug!(path = %path.display(), claimed = %target.display(), "Claimed file");
            return Ok(ClaimedFile {
                original: path.to_path_buf(),
                claimed: target,
            });
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!(
                stale = %target.display(),
                "Stale claim found, claiming under a prefixed name"
            );
        }
        Err(source) => {
            return Err(ClaimError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    let base = now.timestamp_millis();
    for offset in 0..MAX_COLLISION_ATTEMPTS {
        let target = dir.join(collision_name(name, suffix, base + offset));
        match io.rename_no_replace(path, &target) {
            Ok(()) => {
                debug!(path = %path.display(), claimed = %target.display(), "Claimed file");
                return Ok(ClaimedFile {
                    original: path.to_path_buf(),
                    claimed: target,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(ClaimError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    Err(ClaimError::Exhausted(path.to_path_buf()))
}

/// Renames a claimed file back to the name it had before the claim.
pub fn rename_back(io: &dyn FileIo, claimed: &ClaimedFile) -> Result<PathBuf> {
    match io.rename_no_replace(&claimed.claimed, &claimed.original) {
        Ok(()) => Ok(claimed.original.clone()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ClaimError::OriginalReappeared {
            claimed: claimed.claimed.clone(),
            original: claimed.original.clone(),
        }),
        Err(source) => Err(ClaimError::Io {
            path: claimed.claimed.clone(),
            source,
        }),
    }
}

/// Ends a claim according to `mode`.
///
/// Returns the path the content ends up under, or `None` if it was deleted.
pub fn release(io: &dyn FileIo, claimed: &ClaimedFile, mode: &ReleaseMode) -> Result<Option<PathBuf>> {
    match mode {
        ReleaseMode::Delete => {
            io.delete(&claimed.claimed).map_err(io_error(&claimed.claimed))?;
            Ok(None)
        }
        ReleaseMode::RenameBack => rename_back(io, claimed).map(Some),
        ReleaseMode::Archive {
            directory,
            delete_claimed,
        } => {
            if !io.exists(directory) {
                io.create_dir_all(directory).map_err(io_error(directory))?;
            }
            let destination = directory.join(claimed.original_name());
            io.copy(&claimed.claimed, &destination)
                .map_err(io_error(&claimed.claimed))?;
            if *delete_claimed {
                io.delete(&claimed.claimed).map_err(io_error(&claimed.claimed))?;
            }
            Ok(Some(destination))
        }
    }
}

/// Renames claims left behind by a previous run back to their original names.
///
/// Must run before the first cycle: a claim held by a live cycle would be
/// released from under it. A collision claim (`<epochMillis>.<name><suffix>`)
/// is restored to `<name>`, or to `<epochMillis>.<name>` if `<name>` is taken.
/// Claims with no free name are left alone. Returns the number of files
/// restored.
pub fn recover_stale_claims(io: &dyn FileIo, dir: &Path, suffix: &str) -> Result<usize> {
    let entries = io.list_dir(dir).map_err(io_error(dir))?;
    let mut restored = 0;

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stripped) = strip_wip_suffix(name, suffix) else {
            continue;
        };

        let mut targets = Vec::with_capacity(2);
        if let Some(original) = strip_collision_prefix(stripped) {
            targets.push(dir.join(original));
        }
        targets.push(dir.join(stripped));

        match restore_to_first_free(io, &path, &targets)? {
            Some(target) => {
                info!(from = %path.display(), to = %target.display(), "Recovered stale claim");
                restored += 1;
            }
            None => warn!(
                claim = %path.display(),
                "Stale claim left in place, original name is taken"
            ),
        }
    }

    Ok(restored)
}

fn restore_to_first_free<'a>(
    io: &dyn FileIo,
    claimed: &Path,
    targets: &'a [PathBuf],
) -> Result<Option<&'a PathBuf>> {
    for target in targets {
        match io.rename_no_replace(claimed, target) {
            Ok(()) => return Ok(Some(target)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(ClaimError::Io {
                    path: claimed.to_path_buf(),
                    source,
                });
            }
        }
    }
    Ok(None)
}
