//! Shared HTTP plumbing used by every OpenAI-compatible provider client.

use crate::client_wrapper::{Message, NativeToolCall, Role, TokenUsage, ToolDefinition};
use lazy_static::lazy_static;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling; keeps TLS
    /// sessions and DNS lookups warm across the many concurrent requests a
    /// parallel stage can issue.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared http client")
    };
}

pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

fn message_to_wire(msg: &Message) -> serde_json::Value {
    match &msg.role {
        Role::System => serde_json::json!({"role": "system", "content": msg.content.as_ref()}),
        Role::User => serde_json::json!({"role": "user", "content": msg.content.as_ref()}),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                serde_json::json!({"role": "assistant", "content": msg.content.as_ref()})
            } else {
                let tool_calls: Vec<serde_json::Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string())
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": serde_json::Value::Null,
                    "tool_calls": tool_calls
                })
            }
        }
        Role::Tool { call_id } => serde_json::json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": msg.content.as_ref()
        }),
    }
}

fn tools_to_wire(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema
                }
            })
        })
        .collect()
}

/// Call an OpenAI-compatible Chat Completions endpoint (`{base_url}/chat/completions`)
/// with native tool definitions and a bearer token, then parse the assistant
/// reply and any tool calls it requested.
pub async fn send_with_native_tools(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    http_client: &reqwest::Client,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error + Send + Sync>> {
    let body = serde_json::json!({
        "model": model,
        "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        "tools": tools_to_wire(tools),
    });

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("send_with_native_tools: HTTP {status} from {url}: {text}");
        }
        return Err(format!("send_with_native_tools: HTTP {status} — {text}").into());
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)?;

    if let Some(usage_obj) = parsed.get("usage") {
        let input = usage_obj.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let output = usage_obj.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        *usage_slot.lock().await = Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        });
    }

    let choice_msg = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or("send_with_native_tools: no choices in response")?;

    let content: std::sync::Arc<str> = choice_msg
        .get("content")
        .and_then(|c| c.as_str())
        .map(std::sync::Arc::from)
        .unwrap_or_else(|| std::sync::Arc::from(""));

    let tool_calls: Vec<NativeToolCall> = choice_msg
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments = serde_json::from_str(args_str)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    Some(NativeToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        role: Role::Assistant,
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_message_without_tool_calls_serializes_content() {
        let msg = Message {
            role: Role::Assistant,
            content: std::sync::Arc::from("hello"),
            tool_calls: vec![],
        };
        let wire = message_to_wire(&msg);
        assert_eq!(wire["content"], "hello");
        assert!(wire.get("tool_calls").is_none());
    }

    #[test]
    fn assistant_message_with_tool_calls_nulls_content() {
        let msg = Message {
            role: Role::Assistant,
            content: std::sync::Arc::from(""),
            tool_calls: vec![NativeToolCall {
                id: "call_1".into(),
                name: "kubernetes_get_pods".into(),
                arguments: serde_json::json!({"namespace": "default"}),
            }],
        };
        let wire = message_to_wire(&msg);
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "kubernetes_get_pods");
    }
}
