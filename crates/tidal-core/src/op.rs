//! Store operations
//!
//! Every mutation of the store is described by a [`StoreOp`]: a key, the kind
//! of write and the value to write. Envelopes, server-pushed updates and
//! pagination merges all reduce to lists of these, so a single `apply` path
//! handles notification for all of them.

use crate::{Key, Value, ValueMap};
use serde::{Deserialize, Serialize};

/// Kind of write performed by a [`StoreOp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    /// Replace the whole value; `Null` removes the record
    Set,
    /// Recursive partial update; `Null` fields delete
    Merge,
    /// Merge a map of member key -> partial into many members of a collection
    MergeCollection,
}

/// One write against the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOp {
    /// Target key (a collection key for `MergeCollection`)
    pub key: Key,
    /// The kind of write
    #[serde(rename = "onyxMethod", alias = "kind")]
    pub kind: OpKind,
    /// The value to write
    pub value: Value,
}

impl StoreOp {
    /// Replace the whole value at `key`
    pub fn set(key: Key, value: impl Into<Value>) -> Self {
        Self {
            key,
            kind: OpKind::Set,
            value: value.into(),
        }
    }

    /// Remove the record at `key`
    pub fn remove(key: Key) -> Self {
        Self::set(key, Value::Null)
    }

    /// Merge a partial value into `key`
    pub fn merge(key: Key, patch: impl Into<Value>) -> Self {
        Self {
            key,
            kind: OpKind::Merge,
            value: patch.into(),
        }
    }

    /// Merge partials into many members of `collection` as one unit
    pub fn merge_collection(collection: Key, members: impl IntoIterator<Item = (Key, Value)>) -> Self {
        let members: ValueMap = members
            .into_iter()
            .map(|(k, v)| (String::from(k), v))
            .collect();
        Self {
            key: collection,
            kind: OpKind::MergeCollection,
            value: Value::Map(members),
        }
    }

    /// Keys this op writes to
    ///
    /// For a well-formed `MergeCollection` these are the member keys; member
    /// names that are not valid keys are skipped here and rejected by the store.
    pub fn touched_keys(&self) -> Vec<Key> {
        match self.kind {
            OpKind::Set | OpKind::Merge => vec![self.key.clone()],
            OpKind::MergeCollection => self
                .value
                .as_map()
                .map(|members| {
                    members
                        .keys()
                        .filter_map(|k| Key::new(k.as_str()).ok())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}
