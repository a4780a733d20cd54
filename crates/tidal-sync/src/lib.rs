//! Tidal Sync - Network dispatch for the offline-first engine
//!
//! This crate connects the local store and command queue to a remote
//! service:
//!
//! - **Engine**: the facade applications hold (`enqueue`, `cancel`, `restore`)
//! - **Dispatcher**: a tokio task sending ready commands with timeout and backoff
//! - **Transport**: the `Remote` trait and its wire format
//! - **Pagination**: cursor-based paging over collections, built on reads
//! - **Server updates**: pushed batches applied in update-id order
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ Pagination   │──▶│ CommandQueue │──▶│   Dispatcher     │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘  │
//! │         │                  │                    │            │
//! │         ▼                  ▼                    ▼            │
//! │  ┌──────────────────────────────────┐   ┌──────────────────┐ │
//! │  │              Store               │◀──│     Remote       │ │
//! │  └──────────────────────────────────┘   └──────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tidal_core::{EnvelopeBuilder, Key, Value};
//! use tidal_queue::Command;
//! use tidal_sync::{Engine, ScriptedRemote};
//!
//! # async fn demo() -> tidal_sync::Result<()> {
//! let engine = Engine::builder(ScriptedRemote::new()).build()?;
//! engine.restore()?;
//! engine.start();
//!
//! let report = Key::new("report_1")?;
//! let envelope = EnvelopeBuilder::new(engine.store())
//!     .merge(report.clone(), Value::from_pairs([("name", "Lisbon")]))
//!     .build();
//! let ticket = engine.enqueue(
//!     Command::write("RenameReport", report)
//!         .with_param("name", "Lisbon")
//!         .with_envelope(envelope),
//! )?;
//!
//! // Already visible locally; the ticket settles once the server answers.
//! let _outcome = ticket.outcome().await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod dispatcher;
pub mod engine;
mod error;
pub mod pagination;
pub mod scripted;
pub mod transport;
pub mod updates;

pub use config::{BackoffConfig, SyncConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, Result, TransportError};
pub use pagination::{Direction, PageResult, PageSpec, PaginationController};
pub use scripted::{Reply, ScriptedRemote};
pub use transport::{Remote, RemoteResponse, ResponseStatus, WireRequest};
pub use updates::{ServerUpdates, UpdateOutcome, UpdateTracker};
