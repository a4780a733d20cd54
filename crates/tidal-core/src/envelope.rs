//! Four-phase update envelopes
//!
//! An [`Envelope`] describes how one command moves the store: what to write
//! right away (optimistic), once the remote confirms (success), when it
//! rejects (failure) and in either case afterwards (finally).
//!
//! Envelopes should be produced with [`EnvelopeBuilder`], which snapshots
//! every key before the optimistic phase is applied and derives the
//! failure phase from those snapshots. Callers describe only what changes.

use crate::{Key, Store, StoreOp, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field written on a record while a command touching it is unconfirmed
pub const PENDING_ACTION_FIELD: &str = "pendingAction";

/// Field holding error markers keyed by microsecond timestamp
pub const ERRORS_FIELD: &str = "errors";

/// The phases of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Optimistic,
    Success,
    Failure,
    Finally,
}

/// Marker describing which kind of unconfirmed change a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Add,
    Update,
    Delete,
}

impl PendingAction {
    /// Wire name of this action
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::Add => "add",
            PendingAction::Update => "update",
            PendingAction::Delete => "delete",
        }
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered store operations for every phase of one command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Applied synchronously when the command is enqueued (and on restore)
    #[serde(default)]
    pub optimistic: Vec<StoreOp>,
    /// Applied when the remote confirms the command
    #[serde(default)]
    pub success: Vec<StoreOp>,
    /// Applied when the remote rejects the command or retries run out
    #[serde(default)]
    pub failure: Vec<StoreOp>,
    /// Applied after success or failure, exactly once
    #[serde(default)]
    pub finally: Vec<StoreOp>,
    /// Record that receives an error marker on permanent failure
    #[serde(default)]
    pub error_key: Option<Key>,
}

impl Envelope {
    /// Create an empty envelope
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations of one phase
    pub fn phase(&self, phase: Phase) -> &[StoreOp] {
        match phase {
            Phase::Optimistic => &self.optimistic,
            Phase::Success => &self.success,
            Phase::Failure => &self.failure,
            Phase::Finally => &self.finally,
        }
    }

    /// Check whether every phase is empty
    pub fn is_empty(&self) -> bool {
        self.optimistic.is_empty()
            && self.success.is_empty()
            && self.failure.is_empty()
            && self.finally.is_empty()
    }

    /// Absorb the envelope of a later command that is folded into this one.
    ///
    /// Optimistic, success and finally ops run in command order. Failure ops
    /// run in reverse command order so the later command is undone first and
    /// the earlier snapshot wins for keys both commands touched.
    pub fn fold(&mut self, later: Envelope) {
        self.optimistic.extend(later.optimistic);
        self.success.extend(later.success);
        let earlier_failure = std::mem::take(&mut self.failure);
        self.failure = later.failure;
        self.failure.extend(earlier_failure);
        self.finally.extend(later.finally);
        if self.error_key.is_none() {
            self.error_key = later.error_key;
        }
    }

    /// Build the op that records a permanent failure on `error_key`
    pub fn error_op(&self, at_micros: i64, message: &str) -> Option<StoreOp> {
        self.error_key.as_ref().map(|key| {
            StoreOp::merge(
                key.clone(),
                Value::from_pairs([(
                    ERRORS_FIELD,
                    Value::from_pairs([(at_micros.to_string(), Value::from(message))]),
                )]),
            )
        })
    }
}

/// Builds an [`Envelope`] while snapshotting every touched key
///
/// ```
/// use tidal_core::{EnvelopeBuilder, Key, PendingAction, Store, Value};
///
/// let store = Store::new();
/// let comment = Key::new("reportAction_77").unwrap();
/// let envelope = EnvelopeBuilder::new(&store)
///     .set(comment.clone(), Value::from_pairs([("text", "hello")]))
///     .pending(comment.clone(), PendingAction::Add)
///     .build();
///
/// // The record was absent, so failure removes it again.
/// assert_eq!(envelope.failure[0].value, Value::Null);
/// ```
pub struct EnvelopeBuilder<'s> {
    store: &'s Store,
    snapshots: IndexMap<Key, Option<Value>>,
    envelope: Envelope,
    failure: Vec<StoreOp>,
}

impl<'s> EnvelopeBuilder<'s> {
    /// Start an envelope against the current state of `store`
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            snapshots: IndexMap::new(),
            envelope: Envelope::new(),
            failure: Vec::new(),
        }
    }

    fn capture(&mut self, key: &Key) {
        let store = self.store;
        self.snapshots
            .entry(key.clone())
            .or_insert_with(|| store.get(key));
    }

    fn optimistic(mut self, op: StoreOp) -> Self {
        for key in op.touched_keys() {
            self.capture(&key);
        }
        self.envelope.optimistic.push(op);
        self
    }

    /// Optimistically replace the value at `key`
    pub fn set(self, key: Key, value: impl Into<Value>) -> Self {
        self.optimistic(StoreOp::set(key, value))
    }

    /// Optimistically remove the record at `key`
    pub fn remove(self, key: Key) -> Self {
        self.optimistic(StoreOp::remove(key))
    }

    /// Optimistically merge a partial value into `key`
    pub fn merge(self, key: Key, patch: impl Into<Value>) -> Self {
        self.optimistic(StoreOp::merge(key, patch))
    }

    /// Optimistically merge partials into many members of a collection
    pub fn merge_collection(
        self,
        collection: Key,
        members: impl IntoIterator<Item = (Key, Value)>,
    ) -> Self {
        self.optimistic(StoreOp::merge_collection(collection, members))
    }

    /// Mark `key` as carrying an unconfirmed change until the command succeeds
    pub fn pending(mut self, key: Key, action: PendingAction) -> Self {
        self.envelope.success.push(StoreOp::merge(
            key.clone(),
            Value::from_pairs([(PENDING_ACTION_FIELD, Value::Null)]),
        ));
        self.optimistic(StoreOp::merge(
            key,
            Value::from_pairs([(PENDING_ACTION_FIELD, action.as_str())]),
        ))
    }

    /// Add an op applied when the command succeeds
    pub fn on_success(mut self, op: StoreOp) -> Self {
        self.envelope.success.push(op);
        self
    }

    /// Add an op applied after the snapshots are restored on failure
    pub fn on_failure(mut self, op: StoreOp) -> Self {
        self.failure.push(op);
        self
    }

    /// Add an op applied after success or failure
    pub fn finally(mut self, op: StoreOp) -> Self {
        self.envelope.finally.push(op);
        self
    }

    /// Record server error messages on `key` when the command fails
    pub fn error_marker(mut self, key: Key) -> Self {
        self.envelope.error_key = Some(key);
        self
    }

    /// Finish the envelope
    ///
    /// The failure phase restores every snapshotted key (removing keys that
    /// were absent), then runs the caller's own failure ops.
    pub fn build(self) -> Envelope {
        let mut envelope = self.envelope;
        envelope.failure = self
            .snapshots
            .into_iter()
            .map(|(key, previous)| StoreOp::set(key, previous.unwrap_or(Value::Null)))
            .chain(self.failure)
            .collect();
        envelope
    }
}
