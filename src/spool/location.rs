//! Directory addresses: `file://` URLs and bare paths.
//!
//! Accepted forms:
//!
//! ```text
//! file:///var/spool/in   absolute
//! file://var/spool/in    relative to the working directory
//! file:var/spool/in      relative to the working directory
//! /var/spool/in          bare absolute path
//! spool/in               bare relative path
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

const FILE_SCHEME: &str = "file:";

/// Errors produced while resolving a directory address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("empty directory address")]
    Empty,

    /// Something like `http://...`; only local directories can be consumed.
    #[error("unsupported scheme in directory address: {0}")]
    UnsupportedScheme(String),

    #[error("cannot resolve {address}: {reason}")]
    Unresolvable { address: String, reason: String },
}

/// Parses a directory address into a path without touching the filesystem.
pub fn parse_location(address: &str) -> Result<PathBuf, LocationError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LocationError::Empty);
    }

    let path = match address.strip_prefix(FILE_SCHEME) {
        // file:///abs keeps its leading slash; file://rel drops the authority marker.
        Some(rest) => rest.strip_prefix("//").unwrap_or(rest),
        None => {
            if let Some((scheme, _)) = address.split_once("://") {
                return Err(LocationError::UnsupportedScheme(scheme.to_string()));
            }
            address
        }
    };

    if path.is_empty() {
        return Err(LocationError::Empty);
    }
    Ok(PathBuf::from(path))
}

/// Parses a directory address and makes it absolute against the working directory.
pub fn resolve_location(address: &str) -> Result<PathBuf, LocationError> {
    let path = parse_location(address)?;
    absolutize(&path).map_err(|reason| LocationError::Unresolvable {
        address: address.to_string(),
        reason,
    })
}

/// Makes `path` absolute without requiring it to exist.
pub fn absolutize(path: &Path) -> Result<PathBuf, String> {
    std::path::absolute(path).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_file_url() {
        assert_eq!(
            parse_location("file:///var/spool/in").unwrap(),
            PathBuf::from("/var/spool/in")
        );
    }

    #[test]
    fn relative_file_urls() {
        assert_eq!(
            parse_location("file://spool/in").unwrap(),
            PathBuf::from("spool/in")
        );
        assert_eq!(
            parse_location("file:spool/in").unwrap(),
            PathBuf::from("spool/in")
        );
        assert_eq!(parse_location("file://./in").unwrap(), PathBuf::from("./in"));
    }

    #[test]
    fn bare_paths_pass_through() {
        assert_eq!(parse_location(" /tmp/in ").unwrap(), PathBuf::from("/tmp/in"));
        assert_eq!(parse_location("in").unwrap(), PathBuf::from("in"));
    }

    #[test]
    fn rejects_empty_and_foreign_schemes() {
        assert_eq!(parse_location(""), Err(LocationError::Empty));
        assert_eq!(parse_location("file://"), Err(LocationError::Empty));
        assert_eq!(
            parse_location("http://example.com/in"),
            Err(LocationError::UnsupportedScheme("http".to_string()))
        );
    }

    #[test]
    fn resolve_makes_relative_paths_absolute() {
        let resolved = resolve_location("file://spool/in").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("spool/in"));
    }
}
