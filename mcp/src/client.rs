//! Session-aware MCP client: the single entry point the rest of the system
//! calls to list and invoke tools across every registered server.

use crate::protocol::{JsonRpcRequest, McpToolDescriptor, ToolCallContent};
use crate::registry::{McpServerRegistry, TransportKind};
use crate::transport::http::HttpTransport;
use crate::transport::stdio::StdioTransport;
use crate::transport::{Transport, TransportError};
use crate::warnings::{WarningCategory, WarningSink};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum McpClientError {
    UnknownServer(String),
    ServerDisabled(String),
    Transport(TransportError),
    /// The server replied with a JSON-RPC error object; never retried.
    Remote { code: i64, message: String },
}

impl std::fmt::Display for McpClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpClientError::UnknownServer(id) => write!(f, "unknown mcp server '{id}'"),
            McpClientError::ServerDisabled(id) => write!(f, "mcp server '{id}' is disabled"),
            McpClientError::Transport(e) => write!(f, "{e}"),
            McpClientError::Remote { code, message } => {
                write!(f, "mcp server error {code}: {message}")
            }
        }
    }
}

impl std::error::Error for McpClientError {}

impl McpClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpClientError::Transport(e) if e.is_retryable())
    }
}

/// Result of a successful `tools/call`, with masking already applied.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub text: String,
    pub is_error: bool,
}

struct ServerSession {
    transport: Arc<dyn Transport>,
    tools: Vec<McpToolDescriptor>,
}

/// The session map is guarded by a lock only while a session is being
/// created; established sessions are served from an `Arc` clone so concurrent
/// tool calls against different servers never contend with each other.
pub struct McpClient {
    registry: McpServerRegistry,
    sessions: Mutex<HashMap<String, Arc<ServerSession>>>,
    next_request_id: AtomicU64,
    warnings: Arc<dyn WarningSink>,
}

impl McpClient {
    pub fn new(registry: McpServerRegistry, warnings: Arc<dyn WarningSink>) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            warnings,
        }
    }

    pub fn registry(&self) -> &McpServerRegistry {
        &self.registry
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_transport(&self, server_id: &str) -> Result<Arc<dyn Transport>, McpClientError> {
        let config = self
            .registry
            .get(server_id)
            .ok_or_else(|| McpClientError::UnknownServer(server_id.to_string()))?;

        if !config.enabled {
            return Err(McpClientError::ServerDisabled(server_id.to_string()));
        }

        let transport: Arc<dyn Transport> = match &config.transport {
            TransportKind::Stdio { command, args, env } => Arc::new(StdioTransport::new(
                command.clone(),
                args.clone(),
                env.clone(),
            )),
            TransportKind::StreamableHttp {
                url,
                bearer_token,
                verify_tls,
            } => Arc::new(HttpTransport::new(
                url.clone(),
                bearer_token.clone(),
                *verify_tls,
            )),
        };
        Ok(transport)
    }

    async fn initialize_session(&self, server_id: &str) -> Result<Arc<ServerSession>, McpClientError> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(server_id) {
                return Ok(session.clone());
            }
        }

        let transport = self.build_transport(server_id)?;

        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "tarsy", "version": env!("CARGO_PKG_VERSION") },
        });
        let init_request = JsonRpcRequest::new(self.next_id(), "initialize", Some(init_params));
        let init_response = transport
            .send(init_request)
            .await
            .map_err(McpClientError::Transport)?;
        if let Some(err) = init_response.error {
            return Err(McpClientError::Remote {
                code: err.code,
                message: err.message,
            });
        }

        let list_request = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let list_response = transport
            .send(list_request)
            .await
            .map_err(McpClientError::Transport)?;
        if let Some(err) = list_response.error {
            return Err(McpClientError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        let tools: Vec<McpToolDescriptor> = list_response
            .result
            .and_then(|v| v.get("tools").cloned())
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let session = Arc::new(ServerSession { transport, tools });

        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(server_id.to_string())
            .or_insert_with(|| session.clone());
        Ok(sessions.get(server_id).unwrap().clone())
    }

    async fn session_for(&self, server_id: &str) -> Result<Arc<ServerSession>, McpClientError> {
        match self.initialize_session(server_id).await {
            Ok(session) => {
                self.warnings
                    .clear_warning(WarningCategory::McpServerUnavailable, server_id)
                    .await;
                Ok(session)
            }
            Err(e) => {
                self.warnings
                    .ensure_warning(
                        WarningCategory::McpServerUnavailable,
                        server_id,
                        e.to_string(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<McpToolDescriptor>, McpClientError> {
        let session = self.session_for(server_id).await?;
        Ok(session.tools.clone())
    }

    pub async fn list_all_tools(&self) -> HashMap<String, Vec<McpToolDescriptor>> {
        let mut out = HashMap::new();
        for server_id in self.registry.enabled_server_ids() {
            if let Ok(tools) = self.list_tools(&server_id).await {
                out.insert(server_id, tools);
            }
        }
        out
    }

    /// Invoke `tool_name` on `server_id`, with one retry on a transient
    /// transport failure (connect/timeout), discarding and re-establishing the
    /// session before retrying. JSON-RPC error objects are never retried.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpClientError> {
        match self
            .call_tool_once(server_id, tool_name, arguments.clone())
            .await
        {
            Ok(result) => Ok(result),
            Err(e) if e.is_retryable() => {
                if let Some(session) = self.sessions.lock().await.remove(server_id) {
                    session.transport.reset().await;
                }
                self.call_tool_once(server_id, tool_name, arguments).await
            }
            Err(e) => Err(e),
        }
    }

    async fn call_tool_once(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpClientError> {
        let config = self
            .registry
            .get(server_id)
            .ok_or_else(|| McpClientError::UnknownServer(server_id.to_string()))?
            .clone();

        let session = self.session_for(server_id).await?;

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let request = JsonRpcRequest::new(self.next_id(), "tools/call", Some(params));
        let response = session
            .transport
            .send(request)
            .await
            .map_err(McpClientError::Transport)?;

        if let Some(err) = response.error {
            return Err(McpClientError::Remote {
                code: err.code,
                message: err.message,
            });
        }

        let content: ToolCallContent = response
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpClientError::Transport(TransportError::Protocol(e.to_string())))?
            .unwrap_or_default();

        let masked_text = config.apply_masking(&content.concatenated_text());

        Ok(ToolCallResult {
            text: masked_text,
            is_error: content.is_error,
        })
    }

    /// Send a bare `ping` to confirm the server is alive, without touching the
    /// cached tool list. Used by the health monitor.
    pub async fn ping(&self, server_id: &str) -> Result<(), McpClientError> {
        let session = self.session_for(server_id).await?;
        let request = JsonRpcRequest::new(self.next_id(), "ping", None);
        let response = session
            .transport
            .send(request)
            .await
            .map_err(McpClientError::Transport)?;
        if let Some(err) = response.error {
            return Err(McpClientError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::McpServerConfig;
    use crate::warnings::NullWarningSink;

    #[tokio::test]
    async fn unknown_server_is_reported() {
        let client = McpClient::new(McpServerRegistry::new(), Arc::new(NullWarningSink));
        let err = client.list_tools("nope").await.unwrap_err();
        assert!(matches!(err, McpClientError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn disabled_server_is_rejected() {
        let mut registry = McpServerRegistry::new();
        registry.register(
            McpServerConfig::new(
                "disabled-one",
                TransportKind::StreamableHttp {
                    url: "http://localhost:1".into(),
                    bearer_token: None,
                    verify_tls: true,
                },
            )
            .disabled(),
        );
        let client = McpClient::new(registry, Arc::new(NullWarningSink));
        let err = client.list_tools("disabled-one").await.unwrap_err();
        assert!(matches!(err, McpClientError::ServerDisabled(_)));
    }
}
