//! In-process remote with scripted replies
//!
//! Useful for tests, demos and running an app without a server. Replies are
//! taken from a FIFO script first, then from a handler (accepting every
//! request by default). Every request that reaches the "server" is recorded.

use crate::transport::{Remote, RemoteResponse, WireRequest};
use crate::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tidal_core::{ManualNetwork, NetworkStatus, StoreOp};

/// How the scripted server answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Accept
    Ok,
    /// Accept with a payload
    Payload(serde_json::Value),
    /// Reject for good
    Reject(String),
    /// Server-side network error
    NetworkError,
    /// Transport failure, nothing reaches the server
    Fail(TransportError),
    /// Attach authoritative updates to another reply
    WithUpdates(Vec<StoreOp>, Box<Reply>),
    /// Answer after a delay
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn delayed(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }

    pub fn with_updates(self, ops: impl IntoIterator<Item = StoreOp>) -> Self {
        Reply::WithUpdates(ops.into_iter().collect(), Box::new(self))
    }
}

type Handler = dyn Fn(&WireRequest) -> Reply + Send + Sync;

/// A fake remote service
pub struct ScriptedRemote {
    script: Mutex<VecDeque<Reply>>,
    handler: Box<Handler>,
    calls: Mutex<Vec<WireRequest>>,
    network: Option<Arc<ManualNetwork>>,
}

impl ScriptedRemote {
    /// Accept every request
    pub fn new() -> Self {
        Self::with_handler(|_| Reply::Ok)
    }

    /// Answer with `handler` once the script is empty
    pub fn with_handler(handler: impl Fn(&WireRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            network: None,
        }
    }

    /// Fail with [`TransportError::Offline`] while `network` is offline
    pub fn with_network(mut self, network: Arc<ManualNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    /// Script the next reply
    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<WireRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests received for one command name
    pub fn calls_named(&self, name: &str) -> Vec<WireRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.command_name == name)
            .cloned()
            .collect()
    }

    async fn answer(request: &WireRequest, reply: Reply) -> Result<RemoteResponse, TransportError> {
        let mut reply = reply;
        let mut updates = Vec::new();
        loop {
            reply = match reply {
                Reply::Ok => return Ok(RemoteResponse::ok(request).with_updates(updates)),
                Reply::Payload(payload) => {
                    return Ok(RemoteResponse::ok(request)
                        .with_updates(updates)
                        .with_payload(payload))
                }
                Reply::Reject(message) => {
                    return Ok(RemoteResponse::json_error(request, message).with_updates(updates))
                }
                Reply::NetworkError => {
                    return Ok(RemoteResponse::network_error(request).with_updates(updates))
                }
                Reply::Fail(e) => return Err(e),
                Reply::WithUpdates(ops, inner) => {
                    updates.extend(ops);
                    *inner
                }
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
            };
        }
    }
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Remote for ScriptedRemote {
    async fn send(&self, request: WireRequest) -> Result<RemoteResponse, TransportError> {
        if self.network.as_ref().is_some_and(|n| !n.is_online()) {
            return Err(TransportError::Offline);
        }
        self.calls.lock().push(request.clone());
        let scripted = self.script.lock().pop_front();
        let reply = scripted.unwrap_or_else(|| (self.handler)(&request));
        Self::answer(&request, reply).await
    }
}
