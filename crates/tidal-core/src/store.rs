//! Reactive key-value store
//!
//! The store is the single shared mutable resource of the engine. All
//! mutation goes through [`Store::apply`] / [`Store::apply_batch`] so that
//! subscriber notification can never be bypassed.
//!
//! Subscribers run after the write lock is released, which means a callback
//! may freely read the store (or even write to it) without deadlocking.

use crate::{Error, Key, OpKind, Result, StoreOp, Value};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with the changes a subscriber is interested in
///
/// Key subscribers always receive a one-element slice. Collection
/// subscribers receive every changed member of one batch at once.
pub type Callback = Arc<dyn Fn(&[Change]) + Send + Sync>;

/// A change observed by subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// The key that changed
    pub key: Key,
    /// The new value, `None` if the record was removed
    pub value: Option<Value>,
}

/// Handle returned by [`Store::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription:{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    key: Key,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    records: RwLock<IndexMap<Key, Value>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
}

/// In-memory reactive store
///
/// Cloning a `Store` is cheap and yields another handle to the same state.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Inner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.inner.records.read().len())
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

impl Store {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value at `key`
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.records.read().get(key).cloned()
    }

    /// Check whether a record exists at `key`
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.records.read().contains_key(key)
    }

    /// All members currently stored under a collection key
    pub fn members(&self, collection: &Key) -> Vec<(Key, Value)> {
        self.inner
            .records
            .read()
            .iter()
            .filter(|(k, _)| k.is_member_of(collection))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of records in the store
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Apply a single operation
    ///
    /// Returns the number of keys whose value actually changed.
    pub fn apply(&self, op: &StoreOp) -> usize {
        self.apply_batch(std::iter::once(op))
    }

    /// Merge partials into many members of a collection as one logical unit
    pub fn apply_collection(
        &self,
        collection: Key,
        members: impl IntoIterator<Item = (Key, Value)>,
    ) -> usize {
        self.apply(&StoreOp::merge_collection(collection, members))
    }

    /// Apply several operations as one batch
    ///
    /// Subscribers are notified once, after every op has been applied, and
    /// only for keys whose final value differs from the value before the batch.
    pub fn apply_batch<'a>(&self, ops: impl IntoIterator<Item = &'a StoreOp>) -> usize {
        let changes = {
            let mut records = self.inner.records.write();
            let mut before: IndexMap<Key, Option<Value>> = IndexMap::new();

            for op in ops {
                if let Err(err) = validate(op) {
                    tracing::error!(key = %op.key, error = %err, "rejected malformed store op");
                    debug_assert!(false, "store contract violation: {}", err);
                    continue;
                }
                for key in op.touched_keys() {
                    before
                        .entry(key.clone())
                        .or_insert_with(|| records.get(&key).cloned());
                }
                write_op(&mut records, op);
            }

            before
                .into_iter()
                .filter_map(|(key, old)| {
                    let new = records.get(&key).cloned();
                    (old != new).then_some(Change { key, value: new })
                })
                .collect::<Vec<_>>()
        };

        let changed = changes.len();
        if changed > 0 {
            self.notify(&changes);
        }
        changed
    }

    /// Register a callback for `key`
    ///
    /// Subscribing to a collection key (`report_`) observes all its members.
    pub fn subscribe<F>(&self, key: Key, callback: F) -> SubscriptionId
    where
        F: Fn(&[Change]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscriber {
            id,
            key,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    fn notify(&self, changes: &[Change]) {
        // Clone the callbacks out so none run under the subscriber lock.
        let targets: Vec<(Key, Callback)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|s| (s.key.clone(), Arc::clone(&s.callback)))
            .collect();

        for (key, callback) in targets {
            if key.is_collection() {
                let batch: Vec<Change> = changes
                    .iter()
                    .filter(|c| c.key.is_member_of(&key))
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    callback(&batch);
                }
            } else if let Some(change) = changes.iter().find(|c| c.key == key) {
                callback(std::slice::from_ref(change));
            }
        }
    }
}

/// Check an op against the store's key contract without applying it
pub fn validate(op: &StoreOp) -> Result<()> {
    if op.kind != OpKind::MergeCollection {
        return Ok(());
    }
    if !op.key.is_collection() {
        return Err(Error::InvalidKey(op.key.to_string()));
    }
    let members = op.value.as_map().ok_or_else(|| Error::TypeError {
        expected: "map".to_string(),
        got: op.value.type_name().to_string(),
    })?;
    for member in members.keys() {
        let key = Key::new(member.as_str())?;
        if !key.is_member_of(&op.key) {
            return Err(Error::NotInCollection {
                collection: op.key.to_string(),
                member: member.clone(),
            });
        }
    }
    Ok(())
}

fn write_op(records: &mut IndexMap<Key, Value>, op: &StoreOp) {
    match op.kind {
        OpKind::Set => write_set(records, &op.key, &op.value),
        OpKind::Merge => write_merge(records, &op.key, &op.value),
        OpKind::MergeCollection => {
            if let Some(members) = op.value.as_map() {
                for (member, patch) in members {
                    // validate() has already checked every member name
                    if let Ok(key) = Key::new(member.as_str()) {
                        write_merge(records, &key, patch);
                    }
                }
            }
        }
    }
}

fn write_set(records: &mut IndexMap<Key, Value>, key: &Key, value: &Value) {
    if value.is_null() {
        records.shift_remove(key);
    } else {
        records.insert(key.clone(), value.clone());
    }
}

fn write_merge(records: &mut IndexMap<Key, Value>, key: &Key, patch: &Value) {
    if patch.is_null() {
        records.shift_remove(key);
        return;
    }
    match records.get_mut(key) {
        Some(existing) => existing.merge_patch(patch),
        None => {
            let fresh = patch.without_nulls();
            // A patch made only of deletions has nothing to delete here.
            let only_deletions = matches!(&fresh, Value::Map(m) if m.is_empty())
                && patch.as_map().is_some_and(|m| !m.is_empty());
            if !only_deletions {
                records.insert(key.clone(), fresh);
            }
        }
    }
}
