//! Tidal DB - Durable queue storage using native_db
//!
//! Provides the on-disk [`QueueStorage`](tidal_queue::QueueStorage) for the
//! command queue:
//! - One row per durable command, keyed by sequence number
//! - A single metadata row holding the sequence counter
//!
//! Command payloads are stored as JSON so that rows written by an older
//! build still decode after the command set changes.

mod error;
mod models;
mod store;

pub use error::{Error, Result};
pub use models::{StoredCommand, StoredQueueMeta};
pub use store::QueueDb;
