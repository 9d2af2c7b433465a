//! Recursive collection of candidates below the consumed directory.
//!
//! Subdirectories are visited before the files next to them, each level in
//! name order. Symlinks are followed; a link that leads back to one of its
//! own ancestors is reported and skipped, and nothing below `max_depth` is
//! visited.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::spool::is_claimed_path;
use crate::types::FileCandidate;

/// Files found in one directory, in traversal order.
#[derive(Debug)]
pub(crate) struct DirectoryGroup {
    pub directory: PathBuf,
    pub files: Vec<FileCandidate>,
}

/// Walks `root` and returns its non-directory entries grouped by parent.
///
/// Entries carrying `wip_suffix` are left out. `skip` (typically an archive
/// directory inside the tree) is never entered.
///
/// # Errors
///
/// Only a failure to read `root` itself is an error; problems below it are
/// logged and the offending entry skipped.
pub(crate) fn collect_tree(
    root: &Path,
    max_depth: usize,
    wip_suffix: &str,
    skip: Option<&Path>,
) -> io::Result<Vec<DirectoryGroup>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by(|a, b| {
            let a_dir = a.file_type().is_dir();
            let b_dir = b.file_type().is_dir();
            b_dir.cmp(&a_dir).then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry, skip));

    let mut groups: Vec<DirectoryGroup> = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                if let Some(ancestor) = e.loop_ancestor() {
                    warn!(
                        path = ?e.path(),
                        ancestor = %ancestor.display(),
                        "Symlink loop detected, skipping"
                    );
                } else {
                    warn!(error = %e, "Skipping unreadable entry");
                }
                continue;
            }
        };

        if entry.file_type().is_dir() || is_claimed_path(entry.path(), wip_suffix) {
            continue;
        }

        let candidate = match entry.metadata() {
            Ok(metadata) => FileCandidate::from_metadata(entry.path(), &metadata),
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Entry vanished during scan");
                continue;
            }
        };
        let candidate = match candidate {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Cannot stat entry");
                continue;
            }
        };

        let directory = entry
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());
        match groups.last_mut() {
            Some(group) if group.directory == directory => group.files.push(candidate),
            _ => groups.push(DirectoryGroup {
                directory,
                files: vec![candidate],
            }),
        }
    }

    Ok(groups)
}

fn is_skipped(entry: &DirEntry, skip: Option<&Path>) -> bool {
    entry.file_type().is_dir() && skip.is_some_and(|s| entry.path() == s)
}
