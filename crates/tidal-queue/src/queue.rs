//! The command queue
//!
//! [`CommandQueue`] holds every command that has been accepted but not yet
//! settled, in sequence order. It owns no network and no store: admission
//! returns the store ops the caller must apply, and the dispatcher moves
//! entries through their lifecycle:
//!
//! ```text
//! enqueue ──► Queued ──drain──► InFlight ──settle──► (removed)
//!                ▲                  │
//!                └──requeue/release─┘
//! ```
//!
//! # Ordering
//!
//! Commands on the same resource are sent one at a time in sequence order.
//! Only when both the in-flight command and the next one are parallel-safe
//! may they overlap. A command waiting out its backoff holds back everything
//! behind it on its resource.
//!
//! # Durability
//!
//! Durable commands are written to the [`QueueStorage`] after every change
//! that touches them, together with the sequence counter, so that
//! [`CommandQueue::restore`] can rebuild the queue after a restart.

use crate::conflict::{ConflictResolver, Queued, Resolution};
use crate::storage::{PersistedQueue, QueueStorage};
use crate::ticket::{Outcome, Ticket, Waiters};
use crate::{Command, CommandId, CommandRegistry, Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tidal_core::{FocusProvider, Key, StoreOp};

/// Where a queued command is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Queued,
    InFlight,
}

/// A command in the queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub command: Command,
    pub status: EntryStatus,
    /// Failed network attempts so far
    pub attempts: u32,
    /// Not eligible for dispatch before this instant
    pub not_before: Option<Instant>,
}

impl QueueEntry {
    fn new(command: Command) -> Self {
        Self {
            command,
            status: EntryStatus::Queued,
            attempts: 0,
            not_before: None,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

/// Result of offering a command to the queue
#[derive(Debug)]
pub struct Admission {
    /// Resolves when the command (or the one it was folded into) settles
    pub ticket: Ticket,
    /// What the resolver decided
    pub resolution: Resolution,
    /// Store ops the caller applies now, in order
    pub apply: Vec<StoreOp>,
}

/// Ordered, persisted set of unsettled commands
pub struct CommandQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
    resolver: ConflictResolver,
    registry: CommandRegistry,
    storage: Box<dyn QueueStorage>,
    waiters: Waiters,
}

impl CommandQueue {
    /// Create an empty queue backed by `storage`
    pub fn new(storage: impl QueueStorage + 'static) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 1,
            resolver: ConflictResolver::default(),
            registry: CommandRegistry::new(),
            storage: Box::new(storage),
            waiters: Waiters::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Offer a command to the queue
    ///
    /// The command is validated against the registry, then the resolver
    /// decides whether it is appended or folded into what is queued. The
    /// returned [`Admission::apply`] holds the optimistic ops (plus, when a
    /// command is annihilated, its cleanup) for the caller to apply.
    pub fn enqueue(&mut self, mut command: Command) -> Result<Admission> {
        self.registry.validate(&command)?;

        let resolution = {
            let view: Vec<Queued<'_>> = self
                .entries
                .iter()
                .map(|e| Queued {
                    command: &e.command,
                    in_flight: e.status == EntryStatus::InFlight,
                })
                .collect();
            self.resolver.resolve(&view, &command)
        };
        let resolution = self.checked(resolution, &command);

        let mut apply = std::mem::take(&mut command.envelope.optimistic);
        let ticket = match &resolution {
            Resolution::Append => {
                command.envelope.optimistic = apply.clone();
                self.append(command)
            }
            Resolution::Replace(target) => {
                let Some(mut replaced) = self.remove(*target) else {
                    return Err(Error::NotFound(*target));
                };
                command.envelope.optimistic = apply.clone();
                replaced.envelope.fold(std::mem::take(&mut command.envelope));
                command.envelope = replaced.envelope;
                self.waiters.transfer(replaced.id, command.id);
                tracing::debug!(replaced = %replaced.id, by = %command.id, "command replaced");
                self.append(command)
            }
            Resolution::MergeInto { target, params } => {
                let target = *target;
                let Some(entry) = self.entry_mut(target) else {
                    return Err(Error::NotFound(target));
                };
                command.envelope.optimistic = apply.clone();
                entry.command.params = params.clone();
                entry.command.envelope.fold(command.envelope);
                let durable = entry.command.is_durable();
                tracing::debug!(merged = %command.id, into = %target, "command merged");
                self.persist_if(durable);
                self.waiters.attach(target)
            }
            Resolution::Drop(target) => {
                let target = *target;
                let Some(entry) = self.entry_mut(target) else {
                    return Err(Error::NotFound(target));
                };
                command.envelope.optimistic = apply.clone();
                entry.command.envelope.fold(command.envelope);
                let durable = entry.command.is_durable();
                tracing::debug!(dropped = %command.id, onto = %target, "command coalesced");
                self.persist_if(durable);
                self.waiters.attach(target)
            }
            Resolution::Annihilate(target) => {
                let Some(cancelled) = self.remove(*target) else {
                    return Err(Error::NotFound(*target));
                };
                // The pair never reaches the network: the incoming command
                // counts as done locally, the withdrawn one as cancelled.
                apply.extend(command.envelope.success.iter().cloned());
                apply.extend(cancelled.envelope.finally.iter().cloned());
                apply.extend(command.envelope.finally.iter().cloned());
                self.waiters.resolve(cancelled.id, &Outcome::Cancelled);
                self.persist_if(cancelled.is_durable());
                tracing::debug!(cancelled = %cancelled.id, by = %command.id, "command annihilated");
                let ticket = self.waiters.attach(command.id);
                self.waiters.resolve(command.id, &Outcome::Succeeded(None));
                ticket
            }
        };

        Ok(Admission {
            ticket,
            resolution,
            apply,
        })
    }

    /// Downgrade a resolution whose target is missing or already sent
    fn checked(&self, resolution: Resolution, incoming: &Command) -> Resolution {
        let Some(target) = resolution.target() else {
            return resolution;
        };
        match self.get(target) {
            Some(entry)
                if entry.status == EntryStatus::Queued || !resolution.requires_queued_target() =>
            {
                resolution
            }
            Some(_) => {
                tracing::warn!(
                    command = %incoming.name,
                    %target,
                    "conflict target already in flight, appending instead"
                );
                Resolution::Append
            }
            None => {
                tracing::warn!(
                    command = %incoming.name,
                    %target,
                    "conflict target not queued, appending instead"
                );
                Resolution::Append
            }
        }
    }

    fn append(&mut self, mut command: Command) -> Ticket {
        command.seq = self.next_seq;
        self.next_seq += 1;
        let id = command.id;
        let durable = command.is_durable();
        tracing::debug!(command = %command, "command queued");
        self.entries.push(QueueEntry::new(command));
        self.persist_if(durable);
        self.waiters.attach(id)
    }

    fn position(&self, id: CommandId) -> Option<usize> {
        self.entries.iter().position(|e| e.command.id == id)
    }

    fn entry_mut(&mut self, id: CommandId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.command.id == id)
    }

    fn remove(&mut self, id: CommandId) -> Option<Command> {
        self.position(id).map(|idx| self.entries.remove(idx).command)
    }

    /// Pick the commands to send now and mark them in flight
    ///
    /// At most `max_in_flight` commands are in flight afterwards. Reads on
    /// focused resources go first, then everything else by sequence.
    pub fn drain(
        &mut self,
        now: Instant,
        max_in_flight: usize,
        focus: &dyn FocusProvider,
    ) -> Vec<Command> {
        let in_flight = self.in_flight_count();
        let capacity = max_in_flight.saturating_sub(in_flight);
        if capacity == 0 {
            return Vec::new();
        }

        let mut blocked: HashSet<&Key> = HashSet::new();
        let mut busy: HashSet<&Key> = HashSet::new();
        let mut eligible = Vec::new();

        for (idx, entry) in self.entries.iter().enumerate() {
            let resource = &entry.command.resource;
            if blocked.contains(resource) {
                continue;
            }
            match entry.status {
                EntryStatus::InFlight => {
                    if entry.command.parallel_safe {
                        busy.insert(resource);
                    } else {
                        blocked.insert(resource);
                    }
                }
                EntryStatus::Queued => {
                    if !entry.ready(now) {
                        blocked.insert(resource);
                    } else if entry.command.parallel_safe {
                        eligible.push(idx);
                        busy.insert(resource);
                    } else {
                        if !busy.contains(resource) {
                            eligible.push(idx);
                        }
                        blocked.insert(resource);
                    }
                }
            }
        }

        eligible.sort_by_key(|&idx| {
            let cmd = &self.entries[idx].command;
            let focused_read = cmd.is_read() && focus.is_focused(&cmd.resource);
            (!focused_read, cmd.seq)
        });
        eligible.truncate(capacity);

        eligible
            .into_iter()
            .map(|idx| {
                let entry = &mut self.entries[idx];
                entry.status = EntryStatus::InFlight;
                entry.command.clone()
            })
            .collect()
    }

    /// Remove a command that reached a terminal outcome
    ///
    /// Returns the command as it stands now, including anything folded into
    /// it while it was in flight. Waiters are resolved separately with
    /// [`resolve`](Self::resolve) once the caller has applied the envelope.
    pub fn settle(&mut self, id: CommandId) -> Option<Command> {
        let command = self.remove(id)?;
        self.persist_if(command.is_durable());
        Some(command)
    }

    /// Resolve every ticket waiting on `id`
    pub fn resolve(&mut self, id: CommandId, outcome: Outcome) -> usize {
        self.waiters.resolve(id, &outcome)
    }

    /// Put an in-flight command back after a retryable failure
    ///
    /// Returns the number of failed attempts so far.
    pub fn requeue(&mut self, id: CommandId, not_before: Option<Instant>) -> Option<u32> {
        let entry = self.entry_mut(id)?;
        entry.status = EntryStatus::Queued;
        entry.attempts += 1;
        entry.not_before = not_before;
        Some(entry.attempts)
    }

    /// Put an in-flight command back that never reached the server
    ///
    /// Unlike [`requeue`](Self::requeue) this does not count an attempt.
    pub fn release(&mut self, id: CommandId) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        entry.status = EntryStatus::Queued;
        entry.not_before = None;
        true
    }

    /// Make every backing-off command eligible again
    pub fn clear_backoff(&mut self) {
        for entry in &mut self.entries {
            entry.not_before = None;
        }
    }

    /// Withdraw a command that has not been sent
    ///
    /// The caller applies the returned command's failure and finally phases
    /// and then resolves its waiters.
    pub fn cancel(&mut self, id: CommandId) -> Result<Command> {
        match self.get(id) {
            None => Err(Error::NotFound(id)),
            Some(entry) if entry.status == EntryStatus::InFlight => Err(Error::NotCancellable(id)),
            Some(_) => {
                let command = self.remove(id).ok_or(Error::NotFound(id))?;
                self.persist_if(command.is_durable());
                tracing::debug!(command = %command, "command cancelled");
                Ok(command)
            }
        }
    }

    /// Reload durable commands saved by a previous run
    ///
    /// Must run before the first enqueue. Returns the restored commands in
    /// sequence order so the caller can replay their optimistic phases.
    pub fn restore(&mut self) -> Result<Vec<Command>> {
        if !self.entries.is_empty() {
            return Err(Error::RestoreAfterEnqueue);
        }
        let PersistedQueue {
            next_seq,
            mut commands,
        } = self.storage.load()?;
        commands.sort_by_key(|c| c.seq);

        for command in &commands {
            if let Err(e) = self.registry.validate(command) {
                tracing::warn!(command = %command, error = %e, "restored command no longer validates");
            }
        }

        let highest = commands.last().map_or(0, |c| c.seq);
        self.next_seq = self.next_seq.max(next_seq).max(highest + 1);
        self.entries = commands.iter().cloned().map(QueueEntry::new).collect();
        tracing::info!(count = commands.len(), next_seq = self.next_seq, "queue restored");
        Ok(commands)
    }

    /// Write the durable commands to storage now
    pub fn persist(&self) -> Result<()> {
        let snapshot = PersistedQueue {
            next_seq: self.next_seq,
            commands: self
                .entries
                .iter()
                .filter(|e| e.command.is_durable())
                .map(|e| e.command.clone())
                .collect(),
        };
        self.storage.save(&snapshot)
    }

    fn persist_if(&self, durable: bool) {
        if !durable {
            return;
        }
        // The in-memory queue stays authoritative; the next change retries.
        if let Err(e) = self.persist() {
            tracing::error!(error = %e, "failed to persist queue");
        }
    }

    pub fn get(&self, id: CommandId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.command.id == id)
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.position(id).is_some()
    }

    /// Entries in sequence order
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::InFlight)
            .count()
    }

    /// Unsettled commands targeting `resource`
    pub fn pending_for(&self, resource: &Key) -> usize {
        self.entries
            .iter()
            .filter(|e| &e.command.resource == resource)
            .count()
    }

    /// Earliest instant a backing-off command becomes eligible
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Queued)
            .filter_map(|e| e.not_before)
            .min()
    }

    /// Sequence number the next appended command receives
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.entries.len())
            .field("in_flight", &self.in_flight_count())
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}
