//! Dropzone - a filesystem directory used as an inbound/outbound message queue.
//!
//! Files dropped into a consumed directory are discovered, claimed by
//! renaming, turned into [`Message`](types::Message)s and handed to a
//! [`Listener`](consumer::Listener). Produced messages are written back with
//! write-to-temp-then-rename so that readers never see partial files.

pub mod cache;
pub mod consumer;
pub mod filter;
pub mod persistence;
pub mod producer;
pub mod spool;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
