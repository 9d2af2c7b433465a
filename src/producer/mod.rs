//! Atomic output: writing messages as files into a directory.
//!
//! With a temp directory configured, a message is written in full to a
//! uniquely named temp file, fsynced, and renamed into the target directory.
//! The rename is the atomicity boundary: a reader of the target directory
//! sees the complete file or nothing. The temp and target directories must
//! be on the same filesystem.
//!
//! Without a temp directory the file is written in place and a reader may
//! observe it half-written.

pub mod naming;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::consumer::ConfigError;
use crate::consumer::config::{parse_bool, parse_var};
use crate::persistence::atomic::TEMP_EXTENSION;
use crate::spool::location::resolve_location;
use crate::spool::{FileIo, LocalFs};
use crate::types::{Message, attributes};

pub use naming::{FilenameStrategy, OriginalFilename, UniqueFilename};

/// Errors that can occur while producing a file.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// The naming strategy returned something that is not a plain file name.
    #[error("invalid output file name: {0:?}")]
    InvalidFileName(String),

    #[error("output directory {0} does not exist")]
    DirectoryMissing(PathBuf),

    #[error("cannot create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot move {from} to {to}: {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for produce operations.
pub type Result<T> = std::result::Result<T, ProduceError>;

/// Validates that a file name is safe to join onto a directory.
///
/// Rejects empty names, `.`, `..`, path separators and NUL bytes. Hidden
/// names such as `.profile` are allowed.
fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ProduceError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Where produced files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Target directory.
    pub directory: PathBuf,

    /// Directory for in-progress writes. Writes go straight to the target when `None`.
    pub temp_directory: Option<PathBuf>,

    /// Create missing target and temp directories.
    pub create_directories: bool,
}

impl ProducerConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        ProducerConfig {
            directory: directory.into(),
            temp_directory: None,
            create_directories: false,
        }
    }

    pub fn with_temp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_directory = Some(dir.into());
        self
    }

    pub fn with_create_directories(mut self, create: bool) -> Self {
        self.create_directories = create;
        self
    }

    /// Reads `DROPZONE_OUTPUT`, `DROPZONE_OUTPUT_TEMP` and `DROPZONE_CREATE_DIRS`.
    ///
    /// Returns `Ok(None)` when no output directory is configured.
    pub fn from_env() -> std::result::Result<Option<Self>, ConfigError> {
        Self::from_env_with(|var| std::env::var(var).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> std::result::Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(output) = lookup("DROPZONE_OUTPUT") else {
            return Ok(None);
        };
        let mut config = Self::new(resolve_location(&output)?);
        if let Some(temp) = lookup("DROPZONE_OUTPUT_TEMP") {
            config.temp_directory = Some(resolve_location(&temp)?);
        }
        if let Some(create) = parse_var(&lookup, "DROPZONE_CREATE_DIRS", parse_bool)? {
            config.create_directories = create;
        }
        Ok(Some(config))
    }
}

/// Writes messages into a directory, atomically when a temp directory is set.
#[derive(Debug)]
pub struct AtomicProducer {
    config: ProducerConfig,
    naming: Box<dyn FilenameStrategy>,
    io: Arc<dyn FileIo>,
}

impl AtomicProducer {
    pub fn new(config: ProducerConfig) -> Self {
        AtomicProducer {
            config,
            naming: Box::new(OriginalFilename),
            io: Arc::new(LocalFs),
        }
    }

    pub fn with_naming(mut self, naming: impl FilenameStrategy + 'static) -> Self {
        self.naming = Box::new(naming);
        self
    }

    pub fn with_io(mut self, io: Arc<dyn FileIo>) -> Self {
        self.io = io;
        self
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Writes `message` into the configured directory.
    pub fn produce(&self, message: &mut Message) -> Result<PathBuf> {
        let directory = self.config.directory.clone();
        self.produce_to(message, &directory)
    }

    /// Writes `message` into `directory` and records the produced path on it.
    ///
    /// Returns the path of the produced file.
    pub fn produce_to(&self, message: &mut Message, directory: &Path) -> Result<PathBuf> {
        let name = self.naming.file_name(message);
        validate_file_name(&name)?;

        self.ensure_directory(directory)?;
        let destination = directory.join(&name);

        match &self.config.temp_directory {
            Some(temp_dir) => {
                self.ensure_directory(temp_dir)?;
                let temp = temp_dir.join(format!("{name}.{}.{TEMP_EXTENSION}", Uuid::new_v4()));
                if let Err(source) = self.io.write_all(&temp, message.payload()) {
                    self.discard(&temp);
                    return Err(ProduceError::Write { path: temp, source });
                }
                if let Err(source) = self.io.rename(&temp, &destination) {
                    self.discard(&temp);
                    return Err(ProduceError::Commit {
                        from: temp,
                        to: destination,
                        source,
                    });
                }
            }
            None => {
                self.io
                    .write_all(&destination, message.payload())
                    .map_err(|source| ProduceError::Write {
                        path: destination.clone(),
                        source,
                    })?;
            }
        }

        message.set_attribute(attributes::PRODUCED_FILENAME, destination.display());
        message.set_attribute(attributes::PRODUCED_DIRECTORY, directory.display());
        debug!(path = %destination.display(), bytes = message.payload().len(), "Produced file");
        Ok(destination)
    }

    fn ensure_directory(&self, dir: &Path) -> Result<()> {
        if self.io.exists(dir) {
            return Ok(());
        }
        if !self.config.create_directories {
            return Err(ProduceError::DirectoryMissing(dir.to_path_buf()));
        }
        self.io
            .create_dir_all(dir)
            .map_err(|source| ProduceError::CreateDirectory {
                path: dir.to_path_buf(),
                source,
            })
    }

    fn discard(&self, temp: &Path) {
        if self.io.exists(temp)
            && let Err(e) = self.io.delete(temp)
        {
            warn!(path = %temp.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn named(name: &str, payload: &[u8]) -> Message {
        Message::new(payload).with_attribute(attributes::ORIGINAL_FILENAME, name)
    }

    /// Writes succeed but every rename fails.
    #[derive(Debug)]
    struct NoRenameFs;

    impl FileIo for NoRenameFs {
        fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
            LocalFs.list_dir(dir)
        }
        fn stat(&self, path: &Path) -> io::Result<crate::types::FileCandidate> {
            LocalFs.stat(path)
        }
        fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
            LocalFs.read_all(path)
        }
        fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
            LocalFs.write_all(path, bytes)
        }
        fn delete(&self, path: &Path) -> io::Result<()> {
            LocalFs.delete(path)
        }
        fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            Err(io::Error::other("rename refused"))
        }
        fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            LocalFs.copy(from, to)
        }
        fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
            LocalFs.create_dir_all(dir)
        }
        fn exists(&self, path: &Path) -> bool {
            LocalFs.exists(path)
        }
        fn is_writable_dir(&self, dir: &Path) -> bool {
            LocalFs.is_writable_dir(dir)
        }
    }

    #[test]
    fn writes_through_temp_directory() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let tmp = dir.path().join("tmp");
        let producer = AtomicProducer::new(
            ProducerConfig::new(&out)
                .with_temp_directory(&tmp)
                .with_create_directories(true),
        );
        let mut message = named("a.xml", b"<a/>");

        let path = producer.produce(&mut message).unwrap();

        assert_eq!(path, out.join("a.xml"));
        assert_eq!(std::fs::read(&path).unwrap(), b"<a/>");
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
        assert_eq!(
            message.attribute(attributes::PRODUCED_FILENAME),
            Some(path.display().to_string().as_str())
        );
        assert_eq!(
            message.attribute(attributes::PRODUCED_DIRECTORY),
            Some(out.display().to_string().as_str())
        );
    }

    #[test]
    fn writes_directly_without_temp_directory() {
        let dir = tempdir().unwrap();
        let producer = AtomicProducer::new(ProducerConfig::new(dir.path()));
        let mut message = named("b.txt", b"body");

        let path = producer.produce(&mut message).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"body");
    }

    #[test]
    fn failed_commit_leaves_nothing_visible() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let tmp = dir.path().join("tmp");
        let producer = AtomicProducer::new(
            ProducerConfig::new(&out)
                .with_temp_directory(&tmp)
                .with_create_directories(true),
        )
        .with_io(Arc::new(NoRenameFs));

        let err = producer.produce(&mut named("a.xml", b"<a/>")).unwrap_err();

        assert!(matches!(err, ProduceError::Commit { .. }));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn existing_file_is_replaced_whole() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let tmp = dir.path().join("tmp");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(out.join("a.xml"), b"old and longer content").unwrap();
        let producer = AtomicProducer::new(ProducerConfig::new(&out).with_temp_directory(&tmp));

        producer.produce(&mut named("a.xml", b"new")).unwrap();
        assert_eq!(std::fs::read(out.join("a.xml")).unwrap(), b"new");
    }

    #[test]
    fn missing_directory_is_an_error_unless_created() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("missing");
        let producer = AtomicProducer::new(ProducerConfig::new(&out));

        let err = producer.produce(&mut named("a", b"1")).unwrap_err();
        assert!(matches!(err, ProduceError::DirectoryMissing(_)));
    }

    #[test]
    fn produce_to_overrides_the_target() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("other");
        let producer = AtomicProducer::new(
            ProducerConfig::new(dir.path().join("default")).with_create_directories(true),
        );

        let path = producer.produce_to(&mut named("a", b"1"), &other).unwrap();
        assert_eq!(path, other.join("a"));
        assert!(!dir.path().join("default").exists());
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let dir = tempdir().unwrap();
        let producer = AtomicProducer::new(ProducerConfig::new(dir.path()));

        for name in ["../escape", "a/b", ".", "..", "a\\b"] {
            let err = producer.produce(&mut named(name, b"1")).unwrap_err();
            assert!(
                matches!(err, ProduceError::InvalidFileName(_)),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn hidden_names_are_relayed() {
        let dir = tempdir().unwrap();
        let producer = AtomicProducer::new(ProducerConfig::new(dir.path()));

        producer.produce(&mut named(".hidden", b"dot")).unwrap();

        assert_eq!(std::fs::read(dir.path().join(".hidden")).unwrap(), b"dot");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn unique_naming_never_collides() {
        let dir = tempdir().unwrap();
        let producer =
            AtomicProducer::new(ProducerConfig::new(dir.path())).with_naming(UniqueFilename::new());

        let a = producer.produce(&mut named("same", b"1")).unwrap();
        let b = producer.produce(&mut named("same", b"2")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn config_from_env() {
        assert_eq!(ProducerConfig::from_env_with(|_| None).unwrap(), None);

        let config = ProducerConfig::from_env_with(|var| match var {
            "DROPZONE_OUTPUT" => Some("file:///var/out".to_string()),
            "DROPZONE_OUTPUT_TEMP" => Some("/var/tmp/out".to_string()),
            "DROPZONE_CREATE_DIRS" => Some("true".to_string()),
            _ => None,
        })
        .unwrap()
        .unwrap();

        assert_eq!(
            config,
            ProducerConfig::new("/var/out")
                .with_temp_directory("/var/tmp/out")
                .with_create_directories(true)
        );
    }
}
