//! The engine facade
//!
//! [`Engine`] ties the store, the queue and the remote together. It is
//! cheap to clone; every clone drives the same engine.
//!
//! ```text
//! enqueue ──► CommandQueue ──► optimistic ops ──► Store
//!                 │
//!             dispatcher (tokio task)
//!                 │  drain / send / settle
//!                 ▼
//!              Remote ──► server updates + success|failure + finally ──► Store
//! ```
//!
//! Queue and store are only ever locked for synchronous sections. The
//! queue lock is held while admission ops are applied to the store, so
//! store callbacks must not call back into [`Engine::enqueue`]
//! synchronously; they may spawn a task that does.

use crate::config::SyncConfig;
use crate::dispatcher;
use crate::transport::Remote;
use crate::updates::{ServerUpdates, UpdateOutcome, UpdateTracker};
use crate::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tidal_core::{ContextProviders, Key, Store};
use tidal_db::QueueDb;
use tidal_queue::{
    Command, CommandId, CommandQueue, CommandRegistry, ConflictResolver, MemoryQueueStorage,
    Outcome, QueueStorage, Ticket,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// State shared between the engine handles and the dispatcher task
pub(crate) struct Shared {
    pub(crate) store: Store,
    pub(crate) queue: Mutex<CommandQueue>,
    pub(crate) remote: Arc<dyn Remote>,
    pub(crate) context: ContextProviders,
    pub(crate) config: SyncConfig,
    /// Poked on enqueue, resume and connectivity changes
    pub(crate) wake: Notify,
    paused: AtomicBool,
    pending: watch::Sender<usize>,
    updates: Mutex<UpdateTracker>,
    unreachable: Mutex<Unreachable>,
}

/// Set while the remote reports the server cannot be reached even though
/// the network provider says online
#[derive(Debug, Default)]
struct Unreachable {
    streak: u32,
    until: Option<Instant>,
}

impl Shared {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop dispatching for a backoff delay after the remote reported
    /// `Offline`; returns the end of the hold
    pub(crate) fn hold_unreachable(&self) -> Instant {
        let now = Instant::now();
        let mut hold = self.unreachable.lock();
        match hold.until {
            Some(until) if until > now => until,
            _ => {
                hold.streak = hold.streak.saturating_add(1);
                let until = now + self.config.backoff.delay_for(hold.streak);
                hold.until = Some(until);
                until
            }
        }
    }

    /// End of the current unreachable hold, if one is running
    pub(crate) fn unreachable_until(&self) -> Option<Instant> {
        self.unreachable.lock().until.filter(|at| *at > Instant::now())
    }

    pub(crate) fn clear_unreachable(&self) {
        let mut hold = self.unreachable.lock();
        hold.streak = 0;
        hold.until = None;
    }

    /// Publish the queue length for [`Engine::wait_idle`]
    pub(crate) fn publish_len(&self, queue: &CommandQueue) {
        self.pending.send_replace(queue.len());
    }
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Offline-first mutation engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    runner: Arc<Mutex<Option<Runner>>>,
}

impl Engine {
    pub fn builder(remote: impl Remote + 'static) -> EngineBuilder {
        EngineBuilder::new(remote)
    }

    /// The store this engine writes to
    pub fn store(&self) -> &Store {
        &self.shared.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Reload durable commands from the last run and replay their
    /// optimistic phases, in sequence order
    ///
    /// Call before the first enqueue. Returns the number of commands
    /// restored.
    pub fn restore(&self) -> Result<usize> {
        let mut queue = self.shared.queue.lock();
        let commands = queue.restore()?;
        for command in &commands {
            self.shared.store.apply_batch(command.envelope.optimistic.iter());
        }
        self.shared.publish_len(&queue);
        drop(queue);
        self.shared.wake.notify_one();
        Ok(commands.len())
    }

    /// Spawn the dispatcher on the current tokio runtime
    ///
    /// Does nothing if it is already running.
    pub fn start(&self) {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher::run(self.shared.clone(), shutdown_rx));
        *runner = Some(Runner { shutdown, handle });
    }

    /// Stop the dispatcher after the requests already sent have settled
    pub async fn shutdown(&self) {
        let runner = self.runner.lock().take();
        let Some(runner) = runner else {
            return;
        };
        let _ = runner.shutdown.send(true);
        if let Err(e) = runner.handle.await {
            tracing::error!(error = %e, "dispatcher task failed");
        }
    }

    /// Queue a command
    ///
    /// The command's optimistic phase is visible in the store when this
    /// returns. Errors only for commands the registry rejects.
    pub fn enqueue(&self, command: Command) -> Result<Ticket> {
        let mut queue = self.shared.queue.lock();
        let admission = queue.enqueue(command)?;
        self.shared.store.apply_batch(admission.apply.iter());
        self.shared.publish_len(&queue);
        drop(queue);
        self.shared.wake.notify_one();
        Ok(admission.ticket)
    }

    /// Withdraw a command that has not been sent and roll it back
    pub fn cancel(&self, id: CommandId) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        let command = queue.cancel(id)?;
        self.shared.store.apply_batch(
            command
                .envelope
                .failure
                .iter()
                .chain(command.envelope.finally.iter()),
        );
        queue.resolve(id, Outcome::Cancelled);
        self.shared.publish_len(&queue);
        Ok(())
    }

    /// Stop sending new commands; requests already sent still settle
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("dispatch paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("dispatch resumed");
        }
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Re-check connectivity now instead of at the next poll
    ///
    /// Also ends any hold after the remote reported the server unreachable.
    pub fn network_changed(&self) {
        self.shared.clear_unreachable();
        self.shared.wake.notify_one();
    }

    /// Apply a batch of server-pushed updates
    pub fn apply_server_updates(&self, updates: &ServerUpdates) -> UpdateOutcome {
        self.shared.updates.lock().apply(&self.shared.store, updates)
    }

    /// Wait until every queued command has settled
    pub async fn wait_idle(&self) {
        let mut pending = self.shared.pending.subscribe();
        let _ = pending.wait_for(|len| *len == 0).await;
    }

    /// Unsettled commands
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Unsettled commands targeting `resource`
    pub fn pending_for(&self, resource: &Key) -> usize {
        self.shared.queue.lock().pending_for(resource)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.queue.lock().in_flight_count()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("queue", &*self.shared.queue.lock())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

/// Configures an [`Engine`]
pub struct EngineBuilder {
    remote: Arc<dyn Remote>,
    store: Option<Store>,
    context: ContextProviders,
    config: SyncConfig,
    resolver: ConflictResolver,
    registry: CommandRegistry,
    storage: Option<Box<dyn QueueStorage>>,
}

impl EngineBuilder {
    pub fn new(remote: impl Remote + 'static) -> Self {
        Self {
            remote: Arc::new(remote),
            store: None,
            context: ContextProviders::default(),
            config: SyncConfig::default(),
            resolver: ConflictResolver::default(),
            registry: CommandRegistry::new(),
            storage: None,
        }
    }

    /// Write into an existing store
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn context(mut self, context: ContextProviders) -> Self {
        self.context = context;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persist the queue here instead of `config.queue_path`
    pub fn storage(mut self, storage: impl QueueStorage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    pub fn build(self) -> Result<Engine> {
        let storage: Box<dyn QueueStorage> = match (self.storage, &self.config.queue_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Box::new(QueueDb::open(path)?),
            (None, None) => Box::new(MemoryQueueStorage::new()),
        };
        let queue = CommandQueue::new(storage)
            .with_resolver(self.resolver)
            .with_registry(self.registry);
        let (pending, _) = watch::channel(0);

        Ok(Engine {
            shared: Arc::new(Shared {
                store: self.store.unwrap_or_default(),
                queue: Mutex::new(queue),
                remote: self.remote,
                context: self.context,
                config: self.config,
                wake: Notify::new(),
                paused: AtomicBool::new(false),
                pending,
                updates: Mutex::new(UpdateTracker::new()),
                unreachable: Mutex::new(Unreachable::default()),
            }),
            runner: Arc::new(Mutex::new(None)),
        })
    }
}
