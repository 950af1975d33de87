//! C7 Agent Runtime: identity and tool scope for one agent, and the glue
//! that turns one [`IterationController::run`] into an [`AgentExecutionResult`].

use crate::chain_context::AgentExecutionResult;
use crate::client_wrapper::{ClientWrapper, Message, ToolDefinition};
use crate::error::TarsyError;
use crate::hooks::HookPipeline;
use crate::iteration_controller::{CancellationToken, IterationController, IterationOutcome};
use mcp::{McpClient, McpToolDescriptor};
use serde_json::Value;
use std::sync::Arc;
use store::InteractionStore;

/// Static identity and tool scope for one agent, mirroring the identity
/// fields a chain's agent roster is defined by: a stable id, a display name,
/// a free-form expertise blurb folded into the system prompt, and the subset
/// of registered MCP servers this agent is allowed to call.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub name: String,
    pub expertise: Option<String>,
    pub base_system_prompt: String,
    /// Server ids (from the `mcp` crate's registry) this agent may call tools
    /// on; an empty list means "every enabled server".
    pub allowed_server_ids: Vec<String>,
}

impl AgentDefinition {
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>, base_system_prompt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            expertise: None,
            base_system_prompt: base_system_prompt.into(),
            allowed_server_ids: Vec::new(),
        }
    }

    pub fn with_expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = Some(expertise.into());
        self
    }

    pub fn with_allowed_servers(mut self, server_ids: Vec<String>) -> Self {
        self.allowed_server_ids = server_ids;
        self
    }

    fn augmented_system_prompt(&self) -> String {
        let mut prompt = format!("You are {}.\n", self.name);
        if let Some(expertise) = &self.expertise {
            prompt.push_str(&format!("Your expertise: {expertise}\n"));
        }
        prompt.push('\n');
        prompt.push_str(&self.base_system_prompt);
        prompt
    }
}

pub struct AgentRuntime {
    definition: AgentDefinition,
    client: Arc<dyn ClientWrapper>,
    mcp_client: Arc<McpClient>,
    hooks: Arc<HookPipeline>,
    store: Arc<InteractionStore>,
    max_iterations: u32,
}

impl AgentRuntime {
    pub fn new(
        definition: AgentDefinition,
        client: Arc<dyn ClientWrapper>,
        mcp_client: Arc<McpClient>,
        hooks: Arc<HookPipeline>,
        store: Arc<InteractionStore>,
        max_iterations: u32,
    ) -> Self {
        Self {
            definition,
            client,
            mcp_client,
            hooks,
            store,
            max_iterations,
        }
    }

    async fn available_tools(&self) -> Vec<ToolDefinition> {
        let all = self.mcp_client.list_all_tools().await;
        let mut tools = Vec::new();
        for (server_id, descriptors) in all {
            if !self.definition.allowed_server_ids.is_empty()
                && !self.definition.allowed_server_ids.contains(&server_id)
            {
                continue;
            }
            tools.extend(descriptors.into_iter().map(|d: McpToolDescriptor| ToolDefinition {
                name: format!("{server_id}_{}", d.name),
                description: d.description,
                parameters_schema: d.input_schema,
            }));
        }
        tools
    }

    /// Run this agent to completion (or a pause/cancellation) on one stage of
    /// one session. `user_prompt` is the alert payload plus any prior stage
    /// context the chain executor has already composed into text, used only
    /// when starting fresh. On resume, pass the conversation reloaded from
    /// the paused stage execution via `resume_messages` instead — the loop
    /// then continues it verbatim rather than rebuilding it from scratch.
    pub async fn run(
        &self,
        session_id: &str,
        stage_execution_id: &str,
        user_prompt: &str,
        starting_iteration: u32,
        resume_messages: Option<Vec<Message>>,
        cancellation: &CancellationToken,
    ) -> Result<AgentOutcome, TarsyError> {
        let tools = self.available_tools().await;
        let mut messages = resume_messages.unwrap_or_else(|| {
            vec![
                Message::system(self.definition.augmented_system_prompt()),
                Message::user(user_prompt.to_string()),
            ]
        });

        let controller = IterationController::new(
            self.client.clone(),
            self.mcp_client.clone(),
            self.hooks.clone(),
            self.store.clone(),
            self.max_iterations,
        );

        let outcome = controller
            .run(
                session_id,
                stage_execution_id,
                &mut messages,
                &tools,
                starting_iteration,
                cancellation,
            )
            .await?;

        match outcome {
            IterationOutcome::Completed {
                final_text,
                iterations_used,
            } => Ok(AgentOutcome::Completed(AgentExecutionResult {
                agent_id: self.definition.agent_id.clone(),
                summary: final_text.clone(),
                iterations_used,
                output: Value::String(final_text),
            })),
            IterationOutcome::Paused { current_iteration } => Ok(AgentOutcome::Paused { current_iteration }),
            IterationOutcome::Cancelled { current_iteration } => Ok(AgentOutcome::Cancelled { current_iteration }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Completed(AgentExecutionResult),
    Paused { current_iteration: u32 },
    Cancelled { current_iteration: u32 },
}
