//! Async filesystem helpers.
//!
//! Re-exported from Tokio so database-backed stores can prepare their
//! directories without blocking an executor thread.

pub use tokio::fs::{create_dir_all, metadata, remove_dir_all, remove_file};
