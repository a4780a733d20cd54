//! Completion handles for enqueued commands

use crate::CommandId;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// How a command ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The remote accepted it, with its response payload if any
    Succeeded(Option<serde_json::Value>),
    /// The remote rejected it or retries ran out
    Failed(String),
    /// Withdrawn before it was sent
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}

/// Resolves once the command it was issued for settles
///
/// When the command was coalesced into another one, the ticket follows the
/// surviving command and [`Ticket::id`] names that command.
#[derive(Debug)]
pub struct Ticket {
    id: CommandId,
    rx: oneshot::Receiver<Outcome>,
}

impl Ticket {
    /// Command this ticket waits on
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wait for the outcome
    ///
    /// If the engine is dropped first the command counts as cancelled.
    pub async fn outcome(self) -> Outcome {
        self.rx.await.unwrap_or(Outcome::Cancelled)
    }

    /// Outcome if already settled
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Outcome::Cancelled),
        }
    }
}

/// Pending tickets per command
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    senders: HashMap<CommandId, Vec<oneshot::Sender<Outcome>>>,
}

impl Waiters {
    pub(crate) fn attach(&mut self, id: CommandId) -> Ticket {
        let (tx, rx) = oneshot::channel();
        self.senders.entry(id).or_default().push(tx);
        Ticket { id, rx }
    }

    /// Hand every waiter of `from` over to `to`
    pub(crate) fn transfer(&mut self, from: CommandId, to: CommandId) {
        if let Some(moved) = self.senders.remove(&from) {
            self.senders.entry(to).or_default().extend(moved);
        }
    }

    pub(crate) fn resolve(&mut self, id: CommandId, outcome: &Outcome) -> usize {
        let Some(senders) = self.senders.remove(&id) else {
            return 0;
        };
        let count = senders.len();
        for tx in senders {
            // A dropped ticket is not an error
            let _ = tx.send(outcome.clone());
        }
        count
    }
}
