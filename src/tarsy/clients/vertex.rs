//! Google Vertex AI client, via its OpenAI-compatible chat-completions endpoint.
//!
//! Vertex authenticates with a short-lived bearer token (a GCP access token)
//! rather than a static API key; callers are responsible for refreshing it
//! and constructing a new client when it expires.

use super::common::{get_shared_http_client, send_with_native_tools};
use crate::client_wrapper::{ClientWrapper, Message, TokenUsage, ToolDefinition};
use async_trait::async_trait;
use std::error::Error;
use tokio::sync::Mutex;

pub struct VertexClient {
    access_token: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl VertexClient {
    /// `base_url` is the full Vertex OpenAI-compatible endpoint, e.g.
    /// `https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/endpoints/openapi`.
    pub fn new(access_token: &str, model: &str, base_url: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http_client: get_shared_http_client().clone(),
            token_usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for VertexClient {
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
            &self.access_token,
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
