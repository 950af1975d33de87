//! xAI Grok client, via its OpenAI-compatible chat-completions endpoint.

use super::common::{get_shared_http_client, send_with_native_tools};
use crate::client_wrapper::{ClientWrapper, Message, TokenUsage, ToolDefinition};
use async_trait::async_trait;
use std::error::Error;
use tokio::sync::Mutex;

pub struct GrokClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl GrokClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, "https://api.x.ai/v1")
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

#[async_trait]
impl ClientWrapper for GrokClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        send_with_native_tools(
            &self.base_url,
            &self.api_key,
            &self.model,
            messages,
            tools,
            &self.http_client,
            &self.token_usage,
        )
        .await
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
