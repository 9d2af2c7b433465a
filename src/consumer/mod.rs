//! Directory consumers: the shared scan-and-process routine.
//!
//! A cycle lists the consumed directory (recursively if configured), drops
//! claimed files and anything the filter rejects, orders what is left and
//! then, file by file:
//!
//! 1. skips files still inside the quiet period or not writable plain files
//! 2. in rename-back mode, skips files whose fingerprint is already cached
//! 3. claims the file by renaming it to its WIP name
//! 4. reads it into a [`Message`](crate::types::Message) with the standard
//!    attributes and hands it to the [`Listener`]
//! 5. releases the claim according to the [`ReleaseMode`](crate::spool::ReleaseMode)
//!
//! A failing file is logged and skipped; the cycle goes on with the next one.
//!
//! # Module Structure
//!
//! - [`config`]: configuration and `DROPZONE_*` environment parsing
//! - [`sort`]: per-cycle processing order
//! - [`listener`]: the downstream callback

pub mod config;
#[allow(clippy::module_inception)]
mod consumer;
pub mod listener;
pub mod sort;
mod traverse;


pub use config::{ConfigError, ConsumerConfig, DEFAULT_MAX_DEPTH};
pub use consumer::{Consumer, ConsumerError, ConsumerState};
pub use listener::{DispatchError, Listener};
pub use sort::SortOrder;
