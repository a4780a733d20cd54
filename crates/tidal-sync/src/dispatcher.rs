//! Network dispatcher
//!
//! A single tokio task owns the dispatch loop. Each pass it
//!
//! 1. notices connectivity changes (clearing backoff when back online)
//! 2. drains ready commands from the queue unless offline or paused
//! 3. spawns one request per drained command into a `JoinSet`
//! 4. waits for a completion, a wake-up, a backoff deadline, the
//!    connectivity poll or shutdown
//!
//! Completions are handled on the loop itself, so a command's phases are
//! applied to the store before the next drain can pick up the command
//! behind it on the same resource.
//!
//! # Outcomes
//!
//! | Response                          | Effect                                            |
//! |-----------------------------------|---------------------------------------------------|
//! | `ok`                              | server updates, success, finally; settled         |
//! | `jsonError`                       | server updates, failure, error marker, finally    |
//! | `networkError`, timeout           | requeued with backoff; failure once retries run out |
//! | transport `Offline`               | requeued without using a retry; dispatch held     |
//!
//! A transport `Offline` means the request never reached the server, so it
//! costs no retry. Dispatch then pauses for a growing backoff delay, until
//! the network provider comes back online or [`Engine::network_changed`]
//! is called, whichever is first.
//!
//! [`Engine::network_changed`]: crate::Engine::network_changed

use crate::engine::Shared;
use crate::transport::{Remote, RemoteResponse, ResponseStatus, WireRequest};
use crate::TransportError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidal_core::StoreOp;
use tidal_queue::{Command, CommandId, CommandQueue, Outcome};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

type Completion = (CommandId, Result<RemoteResponse, TransportError>);

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight: JoinSet<Completion> = JoinSet::new();
    let mut online = shared.context.network.is_online();
    let mut poll = tokio::time::interval(shared.config.connectivity_poll());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(online, "dispatcher started");

    loop {
        let now_online = shared.context.network.is_online();
        if now_online != online {
            online = now_online;
            if online {
                shared.clear_unreachable();
                shared.queue.lock().clear_backoff();
                tracing::info!("connectivity restored, flushing queue");
            } else {
                tracing::info!("connectivity lost, holding queue");
            }
        }

        let unreachable = shared.unreachable_until();
        if online && !shared.is_paused() && unreachable.is_none() {
            let timeout = shared.config.request_timeout();
            for command in shared.drain() {
                in_flight.spawn(send(shared.remote.clone(), command, timeout));
            }
        }

        let now = Instant::now();
        let deadline = shared
            .queue
            .lock()
            .next_deadline()
            .filter(|at| *at > now)
            .into_iter()
            .chain(unreachable)
            .min();
        let backoff = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(joined) = in_flight.join_next() => match joined {
                Ok((id, result)) => shared.complete(id, result),
                Err(e) => tracing::error!(error = %e, "request task failed"),
            },
            _ = shared.wake.notified() => {}
            _ = backoff => {}
            _ = poll.tick() => {}
        }
    }

    // Requests already sent are still settled
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((id, result)) => shared.complete(id, result),
            Err(e) => tracing::error!(error = %e, "request task failed"),
        }
    }
    tracing::info!("dispatcher stopped");
}

async fn send(remote: Arc<dyn Remote>, command: Command, timeout: Duration) -> Completion {
    let id = command.id;
    let request = WireRequest::from(&command);
    tracing::debug!(command = %command, request_id = %id, "sending command");

    let mut task = tokio::spawn(async move { remote.send(request).await });
    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(TransportError::Other(format!("request task failed: {e}"))),
        Err(_) => {
            task.abort();
            Err(TransportError::Timeout)
        }
    };
    (id, result)
}

impl Shared {
    fn drain(&self) -> Vec<Command> {
        let mut queue = self.queue.lock();
        let commands = queue.drain(
            Instant::now(),
            self.config.max_in_flight(),
            self.context.focus.as_ref(),
        );
        if !commands.is_empty() {
            tracing::debug!(
                count = commands.len(),
                in_flight = queue.in_flight_count(),
                "drained commands"
            );
        }
        commands
    }

    /// Apply the outcome of one request
    pub(crate) fn complete(&self, id: CommandId, result: Result<RemoteResponse, TransportError>) {
        let mut queue = self.queue.lock();
        if result.is_ok() {
            self.clear_unreachable();
        }
        match result {
            Ok(response) => match response.status {
                ResponseStatus::Ok => self.succeed(&mut queue, id, response),
                ResponseStatus::JsonError => {
                    let message = response
                        .message
                        .unwrap_or_else(|| "request rejected".to_string());
                    self.fail(&mut queue, id, &response.server_updates, message);
                }
                ResponseStatus::NetworkError => {
                    self.store.apply_batch(response.server_updates.iter());
                    self.retry(&mut queue, id, "server network error".to_string());
                }
            },
            Err(TransportError::Offline) => {
                if queue.release(id) {
                    let until = self.hold_unreachable();
                    tracing::info!(
                        request_id = %id,
                        hold_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "server unreachable, holding queue"
                    );
                }
            }
            Err(e) => self.retry(&mut queue, id, e.to_string()),
        }
        self.publish_len(&queue);
    }

    fn succeed(&self, queue: &mut CommandQueue, id: CommandId, response: RemoteResponse) {
        let Some(command) = queue.settle(id) else {
            tracing::warn!(request_id = %id, "response for a command no longer queued");
            return;
        };
        self.store.apply_batch(
            response
                .server_updates
                .iter()
                .chain(&command.envelope.success)
                .chain(&command.envelope.finally),
        );
        let waiters = queue.resolve(id, Outcome::Succeeded(response.payload));
        tracing::debug!(command = %command, waiters, "command succeeded");
    }

    fn fail(&self, queue: &mut CommandQueue, id: CommandId, server_updates: &[StoreOp], message: String) {
        let Some(command) = queue.settle(id) else {
            tracing::warn!(request_id = %id, "failure for a command no longer queued");
            return;
        };
        let marker = command
            .envelope
            .error_op(self.context.clock.now_micros(), &message);
        self.store.apply_batch(
            server_updates
                .iter()
                .chain(&command.envelope.failure)
                .chain(marker.iter())
                .chain(&command.envelope.finally),
        );
        tracing::error!(command = %command, %message, "command failed");
        queue.resolve(id, Outcome::Failed(message));
    }

    fn retry(&self, queue: &mut CommandQueue, id: CommandId, reason: String) {
        let Some(entry) = queue.get(id) else {
            tracing::warn!(request_id = %id, "retry for a command no longer queued");
            return;
        };
        let failures = entry.attempts + 1;
        if failures > self.config.max_retries {
            let message = format!("gave up after {failures} attempts: {reason}");
            self.fail(queue, id, &[], message);
            return;
        }

        let delay = self.config.backoff.delay_for(failures);
        tracing::warn!(
            command = %entry.command,
            failures,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "transient failure, retrying"
        );
        queue.requeue(id, Some(Instant::now() + delay));
    }
}
