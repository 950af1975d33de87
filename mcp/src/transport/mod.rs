//! Transport abstraction over stdio subprocess and streamable-HTTP servers.

pub mod http;
pub mod stdio;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::fmt;

#[derive(Debug)]
pub enum TransportError {
    /// The underlying process/connection could not be reached at all; retryable.
    Connect(String),
    /// A request was sent but no well-formed response arrived in time; retryable.
    Timeout,
    /// The transport responded but the payload could not be decoded.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "mcp transport connect error: {msg}"),
            TransportError::Timeout => write!(f, "mcp transport timed out"),
            TransportError::Protocol(msg) => write!(f, "mcp transport protocol error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// `Connect` and `Timeout` are transient; `Protocol` reflects a malformed
    /// server reply and is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout)
    }
}

/// A live connection to one MCP server, established once per process lifetime
/// (or re-established by the recovery policy) and reused across calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Tear down and forget any session state so the next `send` reconnects cleanly.
    async fn reset(&self);
}
