//! Durable file writes.
//!
//! Everything that must survive a crash (the processed-item snapshot and
//! produced messages) goes through write-to-temp-then-rename with fsync on
//! both the file and its directory.

pub mod atomic;
pub mod fsync;

pub use atomic::{commit_rename, sibling_temp_path, write_atomic, write_synced};
pub use fsync::{fsync_dir, fsync_file, fsync_parent};
