//! Server-pushed updates
//!
//! Besides command responses, the server pushes batches of store ops tagged
//! with a monotonically increasing update id. Each batch also names the id
//! of the batch before it, which lets the client notice when it missed one.

use serde::{Deserialize, Serialize};
use tidal_core::{Store, StoreOp};

/// One pushed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdates {
    #[serde(rename = "lastUpdateID")]
    pub last_update_id: u64,
    #[serde(rename = "previousUpdateID", default)]
    pub previous_update_id: u64,
    #[serde(alias = "updates", default)]
    pub ops: Vec<StoreOp>,
}

/// What happened to a pushed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Applied in order
    Applied,
    /// Already applied; skipped
    Duplicate,
    /// Applied, but batches between `last_applied` and `previous` were missed
    Gap { last_applied: u64, previous: u64 },
}

/// Tracks the last applied update id
#[derive(Debug, Default)]
pub struct UpdateTracker {
    last_applied: u64,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Apply `updates` to `store` unless they were applied already
    pub fn apply(&mut self, store: &Store, updates: &ServerUpdates) -> UpdateOutcome {
        if updates.last_update_id <= self.last_applied {
            tracing::debug!(
                update_id = updates.last_update_id,
                last_applied = self.last_applied,
                "skipping duplicate server updates"
            );
            return UpdateOutcome::Duplicate;
        }

        let outcome = if updates.previous_update_id > self.last_applied {
            tracing::warn!(
                last_applied = self.last_applied,
                previous = updates.previous_update_id,
                "gap in server updates"
            );
            UpdateOutcome::Gap {
                last_applied: self.last_applied,
                previous: updates.previous_update_id,
            }
        } else {
            UpdateOutcome::Applied
        };

        store.apply_batch(updates.ops.iter());
        self.last_applied = updates.last_update_id;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::{Key, Value};

    fn batch(previous: u64, last: u64, name: &str) -> ServerUpdates {
        ServerUpdates {
            last_update_id: last,
            previous_update_id: previous,
            ops: vec![StoreOp::merge(
                Key::new("report_1").unwrap(),
                Value::from_pairs([("name", name)]),
            )],
        }
    }

    #[test]
    fn test_in_order() {
        let store = Store::new();
        let mut tracker = UpdateTracker::new();
        assert_eq!(tracker.apply(&store, &batch(0, 1, "a")), UpdateOutcome::Applied);
        assert_eq!(tracker.apply(&store, &batch(1, 2, "b")), UpdateOutcome::Applied);
        assert_eq!(tracker.last_applied(), 2);
        let report = store.get(&Key::new("report_1").unwrap()).unwrap();
        assert_eq!(report.get("name"), Some(&Value::from("b")));
    }

    #[test]
    fn test_duplicate_skipped() {
        let store = Store::new();
        let mut tracker = UpdateTracker::new();
        tracker.apply(&store, &batch(0, 2, "new"));
        assert_eq!(tracker.apply(&store, &batch(0, 1, "old")), UpdateOutcome::Duplicate);
        let report = store.get(&Key::new("report_1").unwrap()).unwrap();
        assert_eq!(report.get("name"), Some(&Value::from("new")));
    }

    #[test]
    fn test_gap_still_applied() {
        let store = Store::new();
        let mut tracker = UpdateTracker::new();
        tracker.apply(&store, &batch(0, 1, "a"));
        assert_eq!(
            tracker.apply(&store, &batch(3, 4, "d")),
            UpdateOutcome::Gap {
                last_applied: 1,
                previous: 3
            }
        );
        assert_eq!(tracker.last_applied(), 4);
    }

    #[test]
    fn test_wire_format() {
        let updates: ServerUpdates = serde_json::from_value(serde_json::json!({
            "lastUpdateID": 9,
            "previousUpdateID": 8,
            "updates": [{"key": "report_1", "onyxMethod": "set", "value": null}]
        }))
        .unwrap();
        assert_eq!(updates.last_update_id, 9);
        assert_eq!(updates.ops, vec![StoreOp::remove(Key::new("report_1").unwrap())]);
    }
}
