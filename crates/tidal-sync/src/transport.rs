//! Remote service interface
//!
//! The engine talks to the server through the [`Remote`] trait. Users
//! implement it for their network stack (HTTP, WebSocket, an in-process fake
//! in tests). One call carries one command and yields one response.

use crate::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidal_core::StoreOp;
use tidal_queue::{Command, CommandId, Params};

/// Request body for one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub command_name: String,
    #[serde(rename = "requestID")]
    pub request_id: CommandId,
    #[serde(default)]
    pub params: Params,
}

impl From<&Command> for WireRequest {
    fn from(command: &Command) -> Self {
        Self {
            command_name: command.name.clone(),
            request_id: command.id,
            params: command.params.clone(),
        }
    }
}

/// How the server answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    /// Accepted
    Ok,
    /// Rejected; retrying will not help
    JsonError,
    /// Server-side connectivity problem; retry later
    NetworkError,
}

/// Response to a [`WireRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResponse {
    pub command_name: String,
    #[serde(rename = "requestID")]
    pub request_id: CommandId,
    pub status: ResponseStatus,
    /// Authoritative store ops, applied before the command's own phases
    #[serde(rename = "onyxUpdates", alias = "serverUpdates", default)]
    pub server_updates: Vec<StoreOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RemoteResponse {
    fn answer(request: &WireRequest, status: ResponseStatus) -> Self {
        Self {
            command_name: request.command_name.clone(),
            request_id: request.request_id,
            status,
            server_updates: Vec::new(),
            payload: None,
            message: None,
        }
    }

    /// Accept `request`
    pub fn ok(request: &WireRequest) -> Self {
        Self::answer(request, ResponseStatus::Ok)
    }

    /// Reject `request` for good
    pub fn json_error(request: &WireRequest, message: impl Into<String>) -> Self {
        let mut response = Self::answer(request, ResponseStatus::JsonError);
        response.message = Some(message.into());
        response
    }

    /// Report a retryable server-side failure
    pub fn network_error(request: &WireRequest) -> Self {
        Self::answer(request, ResponseStatus::NetworkError)
    }

    pub fn with_updates(mut self, ops: impl IntoIterator<Item = StoreOp>) -> Self {
        self.server_updates.extend(ops);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// The remote service
#[async_trait]
pub trait Remote: Send + Sync {
    /// Send one command and wait for its response
    async fn send(&self, request: WireRequest) -> Result<RemoteResponse, TransportError>;
}

#[async_trait]
impl<R: Remote + ?Sized> Remote for Arc<R> {
    async fn send(&self, request: WireRequest) -> Result<RemoteResponse, TransportError> {
        (**self).send(request).await
    }
}
