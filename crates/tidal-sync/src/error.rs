//! Error types for tidal-sync

use thiserror::Error;

/// Failure to reach the remote service
///
/// Every variant is transient: the command is retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No connectivity
    #[error("offline")]
    Offline,

    /// No response within the request timeout
    #[error("request timed out")]
    Timeout,

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

/// Sync error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue error
    #[error("Queue error: {0}")]
    Queue(#[from] tidal_queue::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] tidal_core::Error),

    /// Queue database error
    #[error("Database error: {0}")]
    Db(#[from] tidal_db::Error),

    /// No page spec registered for a collection
    #[error("No page spec registered for '{0}'")]
    UnknownPageSpec(String),

    /// Malformed page payload
    #[error("Malformed page: {0}")]
    MalformedPage(String),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, Error>;
