//! Streamable-HTTP transport: JSON-RPC envelopes POSTed to a single endpoint.

use super::{Transport, TransportError};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// HTTP transport for one MCP server. Tracks the `Mcp-Session-Id` the server
/// hands back on `initialize` and echoes it on every subsequent request.
pub struct HttpTransport {
    url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
    session_id: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, verify_tls: bool) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build mcp http client");

        Self {
            url: url.into(),
            bearer_token,
            client,
            session_id: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut builder = self.client.post(&self.url).json(&request);

        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let session_id = self.session_id.read().await.clone();
        if let Some(sid) = &session_id {
            builder = builder.header("Mcp-Session-Id", sid);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if let Some(sid) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(sid.to_string());
        }

        if !response.status().is_success() {
            return Err(TransportError::Connect(format!(
                "mcp server returned status {}",
                response.status()
            )));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn reset(&self) {
        *self.session_id.write().await = None;
    }
}
