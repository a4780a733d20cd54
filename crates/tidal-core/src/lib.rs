//! Tidal Core - Reactive store and optimistic update envelopes
//!
//! This crate provides the local half of the tidal offline-first engine:
//! - Dynamic tree values (`Value`, `ValueMap`) with null-deleting deep merge
//! - Record keys with collection membership (`Key`)
//! - Store operations (`StoreOp`) and the reactive `Store` that applies them
//! - Four-phase envelopes (`Envelope`) and the snapshotting `EnvelopeBuilder`
//! - Injected context providers (network status, focus, clock)
//!
//! ## Example
//!
//! ```rust
//! use tidal_core::{EnvelopeBuilder, Key, PendingAction, Store, Value};
//!
//! let store = Store::new();
//! let report = Key::new("report_1").unwrap();
//!
//! let envelope = EnvelopeBuilder::new(&store)
//!     .merge(report.clone(), Value::from_pairs([("name", "Trip to Lisbon")]))
//!     .pending(report.clone(), PendingAction::Update)
//!     .build();
//!
//! store.apply_batch(envelope.optimistic.iter());
//! assert!(store.get(&report).is_some());
//!
//! // The remote rejected it: back to the captured state.
//! store.apply_batch(envelope.failure.iter());
//! assert!(store.get(&report).is_none());
//! ```

pub mod context;
pub mod envelope;
mod error;
mod key;
mod op;
pub mod store;
pub mod time;
mod value;

pub use context::{ContextProviders, FocusProvider, FocusSet, ManualNetwork, NetworkStatus};
pub use envelope::{Envelope, EnvelopeBuilder, PendingAction, Phase, ERRORS_FIELD, PENDING_ACTION_FIELD};
pub use error::{Error, Result};
pub use key::Key;
pub use op::{OpKind, StoreOp};
pub use store::{Change, Store, SubscriptionId};
pub use time::{Clock, ManualClock, SystemClock};
pub use value::{Value, ValueMap};
