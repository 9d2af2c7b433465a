//! Directory spool primitives: the safety protocol around consumed files.
//!
//! A file dropped into a consumed directory moves through these states:
//!
//! ```text
//! <name>            - waiting (must be settled: untouched for the quiet period)
//! <name><suffix>    - claimed by exactly one cycle of this process
//! (deleted | <name> | <archive>/<name>) - released
//! ```
//!
//! # Safety
//!
//! - Claims are renames, so a file is claimed by at most one path
//! - Names ending in the WIP suffix are never treated as candidates
//! - Renames and deletes are followed by a directory fsync
//! - No cross-process locking: one consumer per directory

pub mod claim;
pub mod io;
pub mod location;
pub mod quiet;

pub use claim::{
    ClaimError, ClaimedFile, DEFAULT_WIP_SUFFIX, ReleaseMode, claim, is_claimed_name,
    is_claimed_path, recover_stale_claims, release, rename_back, strip_wip_suffix,
};
pub use io::{FileIo, LocalFs};
pub use location::{LocationError, parse_location, resolve_location};
pub use quiet::QuietPeriod;
