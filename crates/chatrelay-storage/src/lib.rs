//! ChatRelay Storage - redb-backed stream log.
//!
//! This crate provides the durable half of the resumable stream registry,
//! using redb as the embedded database. It exposes byte-level APIs so the
//! core crate owns the typed registration records.
//!
//! # Tables
//!
//! Every table name is namespaced by a key prefix (default `chatbot-streams`):
//!
//! - `<prefix>:registrations` - serialized stream registrations
//! - `<prefix>:frames` - stream frames keyed by `<stream_id>:<seq>`
//! - `<prefix>:heads` - next frame sequence per stream
//! - `<prefix>:touched` - last write time per stream (ms)

pub mod range_utils;
pub mod stream_log;
pub mod time_utils;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use stream_log::StreamLogStorage;

/// Open (or create) the database at `path` and initialize the stream log.
pub fn open_stream_log(path: impl AsRef<Path>, key_prefix: &str) -> Result<StreamLogStorage> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::create(path)?);
    StreamLogStorage::new(db, key_prefix)
}
