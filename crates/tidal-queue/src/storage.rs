//! Persistence seam for the command queue
//!
//! The queue hands a [`PersistedQueue`] to its [`QueueStorage`] after every
//! change to its durable commands and reads it back on restore. The
//! in-memory implementation lives here; the on-disk one is in `tidal-db`.

use crate::{Command, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The durable part of a queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQueue {
    /// Next sequence number to hand out, never reused
    pub next_seq: u64,
    /// Durable commands, in sequence order
    pub commands: Vec<Command>,
}

/// Where the durable queue lives between restarts
pub trait QueueStorage: Send + Sync {
    /// Read the last saved queue, empty if nothing was saved
    fn load(&self) -> Result<PersistedQueue>;

    /// Replace the saved queue
    fn save(&self, queue: &PersistedQueue) -> Result<()>;
}

impl<S: QueueStorage + ?Sized> QueueStorage for Box<S> {
    fn load(&self) -> Result<PersistedQueue> {
        (**self).load()
    }

    fn save(&self, queue: &PersistedQueue) -> Result<()> {
        (**self).save(queue)
    }
}

/// Storage kept in memory
///
/// Clones share the same contents, so a test can hand one clone to a queue,
/// drop the queue and restore a new one from another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStorage {
    saved: Arc<Mutex<PersistedQueue>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current saved contents
    pub fn snapshot(&self) -> PersistedQueue {
        self.saved.lock().clone()
    }

    /// Number of saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl QueueStorage for MemoryQueueStorage {
    fn load(&self) -> Result<PersistedQueue> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, queue: &PersistedQueue) -> Result<()> {
        *self.saved.lock() = queue.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::Key;

    #[test]
    fn test_clones_share_contents() {
        let storage = MemoryQueueStorage::new();
        let other = storage.clone();

        let mut cmd = Command::write("AddComment", Key::new("report_1").unwrap());
        cmd.seq = 4;
        storage
            .save(&PersistedQueue {
                next_seq: 5,
                commands: vec![cmd.clone()],
            })
            .unwrap();

        let loaded = other.load().unwrap();
        assert_eq!(loaded.next_seq, 5);
        assert_eq!(loaded.commands, vec![cmd]);
        assert_eq!(other.save_count(), 1);
    }

    #[test]
    fn test_empty_load() {
        let loaded = MemoryQueueStorage::new().load().unwrap();
        assert_eq!(loaded, PersistedQueue::default());
    }
}
