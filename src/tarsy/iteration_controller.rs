//! C6 Iteration Controller: drives the ReAct loop (reason → call tools →
//! observe → reason...) for one agent, interleaving LLM calls and MCP tool
//! calls through the hook pipeline, with pause/resume at iteration
//! boundaries and cooperative cancellation.

use crate::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, ToolDefinition};
use crate::error::TarsyError;
use crate::hooks::HookPipeline;
use mcp::{McpClient, McpServerRegistry};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::models::{LlmInteraction, McpInteraction};
use store::InteractionStore;
use uuid::Uuid;

/// Bound on consecutive malformed/empty LLM responses before giving up;
/// these retries never count against `max_iterations`.
const MAX_MALFORMED_RETRIES: u32 = 3;

/// Shared with whatever caller wants to request early stop; checked once per
/// iteration boundary, never mid-tool-call.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Completed { final_text: String, iterations_used: u32 },
    Paused { current_iteration: u32 },
    Cancelled { current_iteration: u32 },
}

pub struct IterationController {
    client: Arc<dyn ClientWrapper>,
    mcp_client: Arc<McpClient>,
    hooks: Arc<HookPipeline>,
    store: Arc<InteractionStore>,
    max_iterations: u32,
}

impl IterationController {
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        mcp_client: Arc<McpClient>,
        hooks: Arc<HookPipeline>,
        store: Arc<InteractionStore>,
        max_iterations: u32,
    ) -> Self {
        Self {
            client,
            mcp_client,
            hooks,
            store,
            max_iterations,
        }
    }

    /// Run the loop starting at `starting_iteration` (nonzero on resume)
    /// with `messages` already containing the full conversation so far.
    pub async fn run(
        &self,
        session_id: &str,
        stage_execution_id: &str,
        messages: &mut Vec<Message>,
        tools: &[ToolDefinition],
        starting_iteration: u32,
        cancellation: &CancellationToken,
    ) -> Result<IterationOutcome, TarsyError> {
        let mut iteration = starting_iteration;
        let mut malformed_retries = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return Ok(IterationOutcome::Cancelled {
                    current_iteration: iteration,
                });
            }
            if iteration >= self.max_iterations {
                return Ok(IterationOutcome::Paused {
                    current_iteration: iteration,
                });
            }

            let started = std::time::Instant::now();
            let response = self
                .client
                .send_message(messages, tools)
                .await
                .map_err(|e| TarsyError::transient(format!("llm call failed: {e}")))?;
            let duration_ms = started.elapsed().as_millis() as i64;

            let usage = self.client.get_last_usage().await;
            self.hooks
                .on_llm_interaction(LlmInteraction {
                    interaction_id: Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    stage_execution_id: stage_execution_id.to_string(),
                    iteration: iteration as i64,
                    provider: "unspecified".to_string(),
                    model: self.client.model_name().to_string(),
                    request_messages: messages_to_json(messages),
                    response_text: Some(response.content.to_string()),
                    tool_calls: tool_calls_to_json(&response.tool_calls),
                    prompt_tokens: usage.as_ref().map(|u| u.input_tokens as i64),
                    completion_tokens: usage.as_ref().map(|u| u.output_tokens as i64),
                    created_at_us: now_us(),
                    duration_ms: Some(duration_ms),
                    error_message: None,
                })
                .await;

            if response.tool_calls.is_empty() && response.content.trim().is_empty() {
                if malformed_retries >= MAX_MALFORMED_RETRIES {
                    return Err(TarsyError::transient(format!(
                        "llm returned {malformed_retries} consecutive malformed/empty responses"
                    )));
                }
                malformed_retries += 1;
                messages.push(response);
                messages.push(Message::user("Please continue with Thought:"));
                continue;
            }
            malformed_retries = 0;

            if response.tool_calls.is_empty() {
                let final_text = response.content.to_string();
                messages.push(response);
                return Ok(IterationOutcome::Completed {
                    final_text,
                    iterations_used: iteration + 1,
                });
            }

            let tool_calls = response.tool_calls.clone();
            messages.push(response);

            for call in tool_calls {
                if cancellation.is_cancelled() {
                    return Ok(IterationOutcome::Cancelled {
                        current_iteration: iteration,
                    });
                }

                let resolved = self.mcp_client.registry().resolve_prefixed_tool_name(&call.name);
                let (server_id, tool_name) = match resolved {
                    Some(pair) => pair,
                    None => {
                        messages.push(Message::tool_result(
                            call.id.clone(),
                            format!("error: no mcp server registered for tool '{}'", call.name),
                        ));
                        continue;
                    }
                };

                let call_started = std::time::Instant::now();
                let result = self.mcp_client.call_tool(&server_id, &tool_name, call.arguments.clone()).await;
                let call_duration_ms = call_started.elapsed().as_millis() as i64;

                let (result_text, is_error) = match &result {
                    Ok(r) => (r.text.clone(), r.is_error),
                    Err(e) => (e.to_string(), true),
                };

                self.hooks
                    .on_mcp_interaction(McpInteraction {
                        interaction_id: Uuid::new_v4().to_string(),
                        session_id: session_id.to_string(),
                        stage_execution_id: stage_execution_id.to_string(),
                        iteration: iteration as i64,
                        server_id,
                        tool_name,
                        arguments: call.arguments.clone(),
                        result_text: Some(result_text.clone()),
                        is_error,
                        created_at_us: now_us(),
                        duration_ms: Some(call_duration_ms),
                    })
                    .await;

                messages.push(Message::tool_result(call.id, result_text));
            }

            iteration += 1;
            if let Err(e) = self
                .store
                .update_stage_execution_progress(stage_execution_id, iteration as i64, &conversation_to_json(messages))
                .await
            {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("failed to persist stage iteration progress: {e}");
                }
            }
        }
    }
}

/// Serializes a conversation losslessly (unlike [`messages_to_json`], which
/// is display-only for audit history) so it can be replayed verbatim on
/// resume.
pub(crate) fn conversation_to_json(messages: &[Message]) -> Value {
    Value::Array(messages.iter().map(message_to_conversation_json).collect())
}

fn message_to_conversation_json(m: &Message) -> Value {
    let role = match &m.role {
        Role::System => serde_json::json!({"kind": "system"}),
        Role::User => serde_json::json!({"kind": "user"}),
        Role::Assistant => serde_json::json!({"kind": "assistant"}),
        Role::Tool { call_id } => serde_json::json!({"kind": "tool", "call_id": call_id}),
    };
    serde_json::json!({
        "role": role,
        "content": m.content.as_ref(),
        "tool_calls": m.tool_calls.iter().map(|c| serde_json::json!({
            "id": c.id,
            "name": c.name,
            "arguments": c.arguments,
        })).collect::<Vec<_>>(),
    })
}

/// Inverse of [`conversation_to_json`]; used to reload a paused stage's
/// conversation on resume. Returns `None` on any shape mismatch rather than
/// panicking, since this reads back data this crate itself wrote.
pub(crate) fn conversation_from_json(value: &Value) -> Option<Vec<Message>> {
    value.as_array()?.iter().map(message_from_conversation_json).collect()
}

fn message_from_conversation_json(value: &Value) -> Option<Message> {
    let role_obj = value.get("role")?;
    let role = match role_obj.get("kind")?.as_str()? {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool {
            call_id: role_obj.get("call_id")?.as_str()?.to_string(),
        },
        _ => return None,
    };
    let content: Arc<str> = Arc::from(value.get("content")?.as_str()?);
    let tool_calls = value
        .get("tool_calls")?
        .as_array()?
        .iter()
        .filter_map(|c| {
            Some(NativeToolCall {
                id: c.get("id")?.as_str()?.to_string(),
                name: c.get("name")?.as_str()?.to_string(),
                arguments: c.get("arguments").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();
    Some(Message { role, content, tool_calls })
}

fn messages_to_json(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": format!("{:?}", m.role),
                    "content": m.content.as_ref(),
                })
            })
            .collect(),
    )
}

fn tool_calls_to_json(calls: &[crate::client_wrapper::NativeToolCall]) -> Option<Value> {
    if calls.is_empty() {
        return None;
    }
    Some(Value::Array(
        calls
            .iter()
            .map(|c| serde_json::json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
            .collect(),
    ))
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Resolve a tool name's owning server, independent of any running
/// controller — used by the agent factory to validate a chain's declared
/// tool list before a session ever starts.
pub fn validate_tool_names(registry: &McpServerRegistry, tool_names: &[String]) -> Result<(), TarsyError> {
    for name in tool_names {
        if registry.resolve_prefixed_tool_name(name).is_none() {
            return Err(TarsyError::internal(format!(
                "tool '{name}' does not resolve to any registered mcp server"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_round_trips_through_json() {
        let mut messages = vec![
            Message::system("be helpful"),
            Message::user("investigate the alert"),
        ];
        messages.push(Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![NativeToolCall {
                id: "call_1".into(),
                name: "kubernetes_get_pods".into(),
                arguments: serde_json::json!({"namespace": "default"}),
            }],
        });
        messages.push(Message::tool_result("call_1", "pod list: ..."));

        let json = conversation_to_json(&messages);
        let restored = conversation_from_json(&json).expect("round trip should succeed");

        assert_eq!(restored.len(), messages.len());
        assert!(matches!(restored[2].role, Role::Assistant));
        assert_eq!(restored[2].tool_calls[0].name, "kubernetes_get_pods");
        assert!(matches!(&restored[3].role, Role::Tool { call_id } if call_id == "call_1"));
        assert_eq!(restored[3].content.as_ref(), "pod list: ...");
    }

    #[test]
    fn conversation_from_json_rejects_unknown_shape() {
        assert!(conversation_from_json(&serde_json::json!({"not": "an array"})).is_none());
    }
}
