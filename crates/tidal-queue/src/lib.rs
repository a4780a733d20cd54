//! Tidal Queue - Durable command queue with conflict resolution
//!
//! This crate holds every command the application has issued but the remote
//! has not yet settled.
//!
//! ## Architecture
//!
//! ```text
//! Command ──► CommandRegistry (validate)
//!               │
//!               ▼
//!          ConflictResolver ──► Append | Replace | MergeInto | Drop | Annihilate
//!               │
//!               ▼
//!          CommandQueue ──► QueueStorage (durable commands + sequence counter)
//!               │
//!               └── Ticket per caller, resolved with an Outcome
//! ```
//!
//! ## Key Components
//!
//! - [`Command`]: name, JSON params, resource and envelope of one request
//! - [`CommandParams`]: typed parameters for a command name
//! - [`ConflictResolver`]: picks a [`ConflictPolicy`] by name pattern
//! - [`CommandQueue`]: ordering, per-resource exclusivity, retries, restore
//! - [`QueueStorage`]: persistence seam, [`MemoryQueueStorage`] for tests
//!
//! The queue never touches the store or the network. Admission hands back
//! the store ops to apply and the dispatcher in `tidal-sync` drives the
//! rest of the lifecycle.

mod command;
pub mod conflict;
mod error;
pub mod queue;
pub mod storage;
mod ticket;

pub use command::{Command, CommandId, CommandKind, CommandParams, CommandRegistry, Params, PersistPolicy};
pub use conflict::{
    ConflictPolicy, ConflictResolver, DeleteCancelsCreate, EditSupersedesCreate, LatestWins,
    NamePattern, Queued, ReadCoalescing, Resolution, ResolverBuilder,
};
pub use error::{Error, Result};
pub use queue::{Admission, CommandQueue, EntryStatus, QueueEntry};
pub use storage::{MemoryQueueStorage, PersistedQueue, QueueStorage};
pub use ticket::{Outcome, Ticket};
