//! The unit of work handed to listeners and written by producers.
//!
//! A [`Message`] is a byte payload plus string key-value attributes. Consumers
//! attach the standard ingest attributes from [`attributes`]; producers record
//! where they wrote the payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known attribute names.
pub mod attributes {
    /// Name of the file the payload was read from.
    pub const ORIGINAL_FILENAME: &str = "originalFilename";
    /// Directory the payload was read from.
    pub const ORIGINAL_DIRECTORY: &str = "originalDirectory";
    /// Last modification time of the source file (RFC 3339).
    pub const FILE_LAST_MODIFIED: &str = "fileLastModified";
    /// Size of the source file in bytes.
    pub const FILE_SIZE: &str = "fileSize";
    /// The consumed directory (the root, for recursive consumers).
    pub const CONSUME_LOCATION: &str = "consumeLocation";
    /// Name of the file a producer wrote.
    pub const PRODUCED_FILENAME: &str = "producedFilename";
    /// Directory a producer wrote into.
    pub const PRODUCED_DIRECTORY: &str = "producedDirectory";
}

/// A byte-bearing unit of work with key-value metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    payload: Vec<u8>,
    attributes: BTreeMap<String, String>,
}

impl Message {
    /// Creates a message with no attributes.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Message {
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute, builder style.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Sets (or replaces) an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    /// Returns an attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attribute(attributes::ORIGINAL_FILENAME) {
            Some(name) => write!(f, "{} ({} bytes)", name, self.payload.len()),
            None => write!(f, "<message> ({} bytes)", self.payload.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_can_be_replaced() {
        let mut message = Message::new(b"x".to_vec()).with_attribute(attributes::FILE_SIZE, 1);
        message.set_attribute(attributes::FILE_SIZE, 2);
        assert_eq!(message.attribute(attributes::FILE_SIZE), Some("2"));
        assert_eq!(message.attributes().len(), 1);
    }

    #[test]
    fn display_prefers_original_filename() {
        let message =
            Message::new(b"abc".to_vec()).with_attribute(attributes::ORIGINAL_FILENAME, "a.xml");
        assert_eq!(message.to_string(), "a.xml (3 bytes)");
        assert_eq!(Message::new(Vec::new()).to_string(), "<message> (0 bytes)");
    }
}
