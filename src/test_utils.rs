//! Shared test utilities and arbitrary generators for property-based testing.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use proptest::prelude::*;

use crate::consumer::{DispatchError, Listener};
use crate::types::{Message, attributes};

/// Writes `bytes` to `path` and backdates its modification time by `age`.
pub fn write_aged(path: &Path, bytes: &[u8], age: Duration) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
    set_age(path, age);
    path.to_path_buf()
}

/// Sets the modification time of `path` to `now - age`.
pub fn set_age(path: &Path, age: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

/// Listener that records every message and fails for selected file names.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    received: Arc<Mutex<Vec<Message>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes messages for `name` fail until [`recover`](Self::recover) is called.
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn recover(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Original file names of all received messages, in arrival order.
    pub fn names(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|m| m.attribute(attributes::ORIGINAL_FILENAME).map(str::to_string))
            .collect()
    }
}

impl Listener for RecordingListener {
    fn on_message(&self, message: Message) -> Result<(), DispatchError> {
        let name = message
            .attribute(attributes::ORIGINAL_FILENAME)
            .unwrap_or_default()
            .to_string();
        if self.failing.lock().unwrap().contains(&name) {
            return Err(DispatchError::Rejected(format!("{name} is configured to fail")));
        }
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

/// Plain file names without path separators or leading dots.
pub fn arb_file_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.-]{0,30}".prop_map(String::from)
}

/// Suffixes usable as a WIP marker.
pub fn arb_wip_suffix() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("_wip".to_string()),
        Just(".part".to_string()),
        "[._~][a-z]{1,6}".prop_map(String::from),
    ]
}
