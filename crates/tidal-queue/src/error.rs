//! Error types for tidal-queue

use crate::CommandId;
use thiserror::Error;

/// Result type for tidal-queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidal-queue
#[derive(Debug, Error)]
pub enum Error {
    /// Command name not present in the registry
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Parameters do not decode into the registered type
    #[error("invalid params for '{name}': {reason}")]
    InvalidParams { name: String, reason: String },

    /// No queued command with this id
    #[error("command {0} not found")]
    NotFound(CommandId),

    /// Command is already in flight and can no longer be withdrawn
    #[error("command {0} is in flight")]
    NotCancellable(CommandId),

    /// Two policies were registered for the same name pattern
    #[error("more than one conflict policy registered for '{0}'")]
    AmbiguousPolicy(String),

    /// Queue restored after commands were already enqueued
    #[error("queue must be restored before the first enqueue")]
    RestoreAfterEnqueue,

    /// Persistent storage failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] tidal_core::Error),
}

impl Error {
    /// Wrap any storage backend error
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
