//! Output file naming.

use std::fmt;

use uuid::Uuid;

use crate::types::{Message, attributes};

/// Chooses the file name a message is written under.
pub trait FilenameStrategy: Send + Sync + fmt::Debug {
    fn file_name(&self, message: &Message) -> String;
}

/// Keeps the name the message was consumed under, or a random one if it has none.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginalFilename;

impl FilenameStrategy for OriginalFilename {
    fn file_name(&self, message: &Message) -> String {
        match message.attribute(attributes::ORIGINAL_FILENAME) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}.msg", Uuid::new_v4()),
        }
    }
}

/// A fresh random name for every message.
#[derive(Debug, Clone, Default)]
pub struct UniqueFilename {
    extension: Option<String>,
}

impl UniqueFilename {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `.<extension>` to generated names.
    pub fn with_extension(extension: impl Into<String>) -> Self {
        UniqueFilename {
            extension: Some(extension.into()),
        }
    }
}

impl FilenameStrategy for UniqueFilename {
    fn file_name(&self, _message: &Message) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }
}
