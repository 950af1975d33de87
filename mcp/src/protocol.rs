//! JSON-RPC 2.0 wire types for the Model Context Protocol.
//!
//! MCP servers are addressed over stdio or streamable-HTTP using plain
//! JSON-RPC 2.0 envelopes. This module only models the shapes this client
//! needs: `initialize`, `tools/list`, `tools/call`, and `ping`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope for `method` with the given `id` and optional params.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response envelope. Either `result` or `error` is present, never both.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// `true` when the server returned a JSON-RPC error object (a `SemanticRemote`
    /// failure per the owning component's error taxonomy — never retried).
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Description of a single tool as reported by `tools/list`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Result payload of a `tools/call` invocation, pre-concatenation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallContent {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ToolCallContent {
    /// Concatenate all text content blocks, matching §4.4's
    /// `{"result": string}` collapsing behavior.
    pub fn concatenated_text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}
