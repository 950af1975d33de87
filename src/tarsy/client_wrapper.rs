//! Provider-agnostic LLM client contract (C5).
//!
//! A [`ClientWrapper`] translates a chat request plus a set of native tool
//! definitions into one provider's wire format and returns a uniform
//! [`Message`]. The iteration controller is the only caller; it owns
//! conversation bookkeeping, this trait owns nothing but the one request.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LLM in a native function-calling response.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum Role {
    System,
    User,
    Assistant,
    /// Correlates with a prior assistant [`NativeToolCall`] by id.
    Tool { call_id: String },
}

#[derive(Clone, Debug)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
    /// Populated by [`ClientWrapper::send_message`] when the provider returns
    /// native function-calling results. Empty for every other message kind.
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Trait defining the interface to interact with various LLM providers.
///
/// All implementations must be thread-safe (`Send + Sync`) so they can be
/// shared between the parallel stage executor's concurrent agent tasks.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send one chat-completion turn. `tools` carries the native tool
    /// definitions the ReAct loop currently has available; implementations
    /// route to their provider's function-calling wire format.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Usage from the most recent [`ClientWrapper::send_message`] call, if
    /// the provider reports it.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where the implementation persists token usage.
    /// Providers that expose billing information should return
    /// `Some(&Mutex<Option<TokenUsage>>)`.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
