//! Queue models for database storage.

use crate::error::Result;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tidal_queue::Command;

/// Primary key of the single metadata row.
pub(crate) const QUEUE_META_ID: &str = "queue";

/// Stored durable command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct StoredCommand {
    /// Primary key - queue sequence number.
    #[primary_key]
    pub seq: u64,
    /// Command name.
    pub name: String,
    /// Request id.
    pub id: String,
    /// JSON-encoded command.
    pub payload: Vec<u8>,
}

impl StoredCommand {
    /// Create from a queued command.
    pub fn from_command(command: &Command) -> Result<Self> {
        Ok(Self {
            seq: command.seq,
            name: command.name.clone(),
            id: command.id.to_string(),
            payload: serde_json::to_vec(command)?,
        })
    }

    /// Decode the command.
    pub fn to_command(&self) -> Result<Command> {
        let mut command: Command = serde_json::from_slice(&self.payload)?;
        command.seq = self.seq;
        Ok(command)
    }
}

/// Stored queue metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct StoredQueueMeta {
    /// Always "queue" - single row.
    #[primary_key]
    pub id: String,
    /// Next sequence number to hand out.
    pub next_seq: u64,
}

impl StoredQueueMeta {
    pub fn new(next_seq: u64) -> Self {
        Self {
            id: QUEUE_META_ID.to_string(),
            next_seq,
        }
    }
}
