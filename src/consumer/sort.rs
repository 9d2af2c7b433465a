use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::types::FileCandidate;

/// Order in which candidates are processed within one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Whatever order the directory listing produced.
    #[default]
    Unordered,
    /// By file name, byte-wise.
    Name,
    /// Oldest modification time first, ties broken by name.
    OldestFirst,
    /// Newest modification time first, ties broken by name.
    NewestFirst,
}

impl SortOrder {
    pub fn apply(&self, candidates: &mut [FileCandidate]) {
        match self {
            SortOrder::Unordered => {}
            SortOrder::Name => candidates.sort_by(by_name),
            SortOrder::OldestFirst => {
                candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| by_name(a, b)))
            }
            SortOrder::NewestFirst => {
                candidates.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| by_name(a, b)))
            }
        }
    }
}

fn by_name(a: &FileCandidate, b: &FileCandidate) -> Ordering {
    a.path.file_name().cmp(&b.path.file_name())
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "unordered" => Ok(SortOrder::Unordered),
            "name" => Ok(SortOrder::Name),
            "oldest" | "oldest-first" => Ok(SortOrder::OldestFirst),
            "newest" | "newest-first" => Ok(SortOrder::NewestFirst),
            other => Err(format!(
                "unknown sort order {other:?} (expected none, name, oldest or newest)"
            )),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortOrder::Unordered => "none",
            SortOrder::Name => "name",
            SortOrder::OldestFirst => "oldest",
            SortOrder::NewestFirst => "newest",
        };
        f.write_str(name)
    }
}
