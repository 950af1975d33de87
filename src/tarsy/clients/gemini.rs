//! Gemini chat-completions client (via Google's OpenAI-compatible endpoint).
//!
//! Gemini's function-calling schema rejects the lowercase JSON Schema type
//! strings MCP tools are described with (`"object"`, `"string"`, ...); it
//! wants `"OBJECT"`, `"STRING"`, etc. [`to_gemini_schema`] recursively
//! upper-cases every `type` key before a tool definition is sent.

use super::common::{get_shared_http_client, send_with_native_tools};
use crate::client_wrapper::{ClientWrapper, Message, TokenUsage, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use tokio::sync::Mutex;

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(
            api_key,
            model,
            "https://generativelanguage.googleapis.com/v1beta/openai",
        )
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http_client: get_shared_http_client().clone(),
            token_usage: Mutex::new(None),
        }
    }
}

/// Recursively convert JSON Schema `type` values (and everything reachable
/// through `properties`/`items`/`additionalProperties`/lists) to Gemini's
/// uppercase convention.
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (key, value) in map {
                let converted = match key.as_str() {
                    "type" => {
                        if let Value::String(s) = value {
                            Value::String(s.to_uppercase())
                        } else {
                            value.clone()
                        }
                    }
                    _ => to_gemini_schema(value),
                };
                result.insert(key.clone(), converted);
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl ClientWrapper for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let gemini_tools: Vec<ToolDefinition> = tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters_schema: to_gemini_schema(&t.parameters_schema),
            })
            .collect();

        send_with_native_tools(
            &self.base_url,
            &self.api_key,
            &self.model,
            messages,
            &gemini_tools,
            &self.http_client,
            &self.token_usage,
        )
        .await
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_cases_nested_types() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "namespace": {"type": "string"},
                "labels": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["namespace"]
        });

        let converted = to_gemini_schema(&schema);
        assert_eq!(converted["type"], "OBJECT");
        assert_eq!(converted["properties"]["namespace"]["type"], "STRING");
        assert_eq!(converted["properties"]["labels"]["type"], "ARRAY");
        assert_eq!(converted["properties"]["labels"]["items"]["type"], "STRING");
        assert_eq!(converted["required"][0], "namespace");
    }
}
