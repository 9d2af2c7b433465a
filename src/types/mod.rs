//! Core value types: files seen in a consumed directory and the messages
//! built from them.

pub mod candidate;
pub mod message;

pub use candidate::{FileCandidate, Fingerprint};
pub use message::{Message, attributes};
