//! Database store wrapper.

use crate::error::{Error, Result};
use crate::models::*;
use native_db::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use tidal_queue::{PersistedQueue, QueueStorage};

// Static models for the database
static MODELS: LazyLock<std::result::Result<Models, String>> = LazyLock::new(|| {
    let mut models = Models::new();
    models
        .define::<StoredCommand>()
        .map_err(|e| e.to_string())?;
    models
        .define::<StoredQueueMeta>()
        .map_err(|e| e.to_string())?;
    Ok(models)
});

fn models() -> Result<&'static Models> {
    MODELS.as_ref().map_err(|e| Error::Database(e.clone()))
}

/// Database holding the durable command queue.
pub struct QueueDb {
    pub(crate) db: Database<'static>,
}

impl QueueDb {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Builder::new()
            .create(models()?, path)
            .map_err(|e| Error::Database(e.to_string()))?;
        tracing::debug!(path = %path.display(), "queue database opened");
        Ok(Self { db })
    }

    /// Create an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let db = Builder::new()
            .create_in_memory(models()?)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Self { db })
    }

    /// Load the stored sequence counter and commands.
    ///
    /// Rows that no longer decode are skipped with a warning.
    pub fn load_queue(&self) -> Result<PersistedQueue> {
        let r = self.db.r_transaction()?;
        let meta: Option<StoredQueueMeta> = r.get().primary(QUEUE_META_ID.to_string())?;

        let scan = r.scan().primary::<StoredCommand>()?;
        let iter = scan.all()?;
        let stored: std::result::Result<Vec<StoredCommand>, _> = iter.collect();
        let stored = stored.map_err(|e| Error::Database(e.to_string()))?;

        let mut commands = Vec::with_capacity(stored.len());
        for row in stored {
            match row.to_command() {
                Ok(command) => commands.push(command),
                Err(e) => {
                    tracing::warn!(seq = row.seq, name = %row.name, error = %e, "skipping undecodable command")
                }
            }
        }
        commands.sort_by_key(|c| c.seq);

        Ok(PersistedQueue {
            next_seq: meta.map_or(0, |m| m.next_seq),
            commands,
        })
    }

    /// Replace the stored queue with `queue`.
    ///
    /// Only rows that were added, changed or settled since the last save are
    /// written.
    pub fn save_queue(&self, queue: &PersistedQueue) -> Result<()> {
        let (stored, meta) = {
            let r = self.db.r_transaction()?;
            let meta: Option<StoredQueueMeta> = r.get().primary(QUEUE_META_ID.to_string())?;
            let scan = r.scan().primary::<StoredCommand>()?;
            let iter = scan.all()?;
            let rows: std::result::Result<Vec<StoredCommand>, _> = iter.collect();
            let rows = rows.map_err(|e| Error::Database(e.to_string()))?;
            let stored: HashMap<u64, StoredCommand> = rows.into_iter().map(|row| (row.seq, row)).collect();
            (stored, meta)
        };

        let keep: HashSet<u64> = queue.commands.iter().map(|c| c.seq).collect();
        let mut changed = Vec::new();
        for command in &queue.commands {
            let row = StoredCommand::from_command(command)?;
            if stored.get(&row.seq).is_none_or(|old| old.payload != row.payload) {
                changed.push(row);
            }
        }
        let stale: Vec<StoredCommand> = stored
            .into_values()
            .filter(|row| !keep.contains(&row.seq))
            .collect();
        let meta_changed = meta.is_none_or(|m| m.next_seq != queue.next_seq);
        if changed.is_empty() && stale.is_empty() && !meta_changed {
            return Ok(());
        }

        let rw = self.db.rw_transaction()?;
        for row in stale {
            rw.remove(row)?;
        }
        let written = changed.len();
        for row in changed {
            rw.upsert(row)?;
        }
        if meta_changed {
            rw.upsert(StoredQueueMeta::new(queue.next_seq))?;
        }
        rw.commit()?;
        tracing::trace!(written, kept = keep.len(), "queue saved");
        Ok(())
    }
}

impl QueueStorage for QueueDb {
    fn load(&self) -> tidal_queue::Result<PersistedQueue> {
        Ok(self.load_queue()?)
    }

    fn save(&self, queue: &PersistedQueue) -> tidal_queue::Result<()> {
        Ok(self.save_queue(queue)?)
    }
}
