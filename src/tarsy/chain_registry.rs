//! C8 Chain Registry & Agent Factory: resolves an alert type to a chain
//! definition, and a chain stage's agent reference to a concrete
//! [`AgentRuntime`].

use crate::agent_runtime::{AgentDefinition, AgentRuntime};
use crate::client_wrapper::ClientWrapper;
use crate::error::TarsyError;
use crate::hooks::HookPipeline;
use crate::parallel_stage::FailurePolicy;
use mcp::McpClient;
use std::collections::HashMap;
use std::sync::Arc;
use store::InteractionStore;

/// A reference to an agent, either a built-in implementation addressed by
/// type name (`"KubernetesAgent"`) or a user-configured one addressed by
/// name (`ConfigurableAgent:{config_name}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRef {
    BuiltIn(String),
    Configurable(String),
}

impl AgentRef {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("ConfigurableAgent:") {
            Some(name) => AgentRef::Configurable(name.to_string()),
            None => AgentRef::BuiltIn(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageAgentSpec {
    pub name: String,
    pub agent_ref: AgentRef,
    pub llm_provider: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ChainStage {
    Single {
        name: String,
        agent: StageAgentSpec,
        failure_policy: FailurePolicy,
    },
    MultiAgent {
        name: String,
        agents: Vec<StageAgentSpec>,
        failure_policy: FailurePolicy,
    },
    Replicated {
        name: String,
        agent: StageAgentSpec,
        replicas: usize,
        failure_policy: FailurePolicy,
    },
}

impl ChainStage {
    pub fn name(&self) -> &str {
        match self {
            ChainStage::Single { name, .. } => name,
            ChainStage::MultiAgent { name, .. } => name,
            ChainStage::Replicated { name, .. } => name,
        }
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, ChainStage::Single { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChainDefinition {
    pub chain_id: String,
    pub alert_types: Vec<String>,
    pub stages: Vec<ChainStage>,
}

impl ChainDefinition {
    /// The last stage's is-parallel predicate, used by the final-analysis
    /// formatter to decide whether to summarize a single result or a fan-out.
    pub fn final_stage_is_parallel(&self) -> bool {
        self.stages.last().map(|s| s.is_parallel()).unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum ChainRegistryError {
    NoMatchingChain(String),
    DuplicateChainId(String),
}

impl std::fmt::Display for ChainRegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainRegistryError::NoMatchingChain(alert_type) => {
                write!(f, "no chain matches alert type '{alert_type}'")
            }
            ChainRegistryError::DuplicateChainId(id) => write!(f, "duplicate chain id '{id}'"),
        }
    }
}

impl std::error::Error for ChainRegistryError {}

#[derive(Default)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainDefinition>,
    by_alert_type: HashMap<String, String>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain: ChainDefinition) -> Result<(), ChainRegistryError> {
        if self.chains.contains_key(&chain.chain_id) {
            return Err(ChainRegistryError::DuplicateChainId(chain.chain_id.clone()));
        }
        for alert_type in &chain.alert_types {
            self.by_alert_type.insert(alert_type.clone(), chain.chain_id.clone());
        }
        self.chains.insert(chain.chain_id.clone(), chain);
        Ok(())
    }

    pub fn get_chain_for_alert(&self, alert_type: &str) -> Result<&ChainDefinition, ChainRegistryError> {
        let chain_id = self
            .by_alert_type
            .get(alert_type)
            .ok_or_else(|| ChainRegistryError::NoMatchingChain(alert_type.to_string()))?;
        Ok(self.chains.get(chain_id).expect("chain_id indexed consistently"))
    }

    pub fn get_chain(&self, chain_id: &str) -> Option<&ChainDefinition> {
        self.chains.get(chain_id)
    }
}

/// Configured, non-built-in agent definitions, keyed by config name.
#[derive(Default)]
pub struct ConfiguredAgentRegistry {
    definitions: HashMap<String, AgentDefinition>,
}

impl ConfiguredAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config_name: impl Into<String>, definition: AgentDefinition) {
        self.definitions.insert(config_name.into(), definition);
    }

    pub fn get(&self, config_name: &str) -> Option<&AgentDefinition> {
        self.definitions.get(config_name)
    }
}

/// Resolves built-in agent type names to their canned [`AgentDefinition`].
/// New built-ins are added here as the corresponding MCP integrations land.
pub fn built_in_agent_definition(type_name: &str) -> Option<AgentDefinition> {
    match type_name {
        "KubernetesAgent" => Some(
            AgentDefinition::new(
                "kubernetes-agent",
                "Kubernetes Agent",
                "Investigate the alert using the available Kubernetes tools. \
                 Identify the affected resources, gather relevant logs and events, \
                 and propose a root cause.",
            )
            .with_expertise("Kubernetes cluster operations and troubleshooting")
            .with_allowed_servers(vec!["kubernetes".to_string()]),
        ),
        "RunbookAgent" => Some(
            AgentDefinition::new(
                "runbook-agent",
                "Runbook Agent",
                "Follow the attached runbook step by step, using tools to verify \
                 each step's preconditions before acting on it.",
            )
            .with_expertise("Operational runbook execution"),
        ),
        _ => None,
    }
}

/// Builds concrete [`AgentRuntime`]s for a resolved [`AgentRef`], wiring in
/// the shared LLM client table, MCP client, and hook pipeline every agent in
/// the process shares.
pub struct AgentFactory {
    configured: ConfiguredAgentRegistry,
    clients: HashMap<String, Arc<dyn ClientWrapper>>,
    default_provider: String,
    mcp_client: Arc<McpClient>,
    hooks: Arc<HookPipeline>,
    store: Arc<InteractionStore>,
    max_iterations: u32,
}

impl AgentFactory {
    pub fn new(
        configured: ConfiguredAgentRegistry,
        clients: HashMap<String, Arc<dyn ClientWrapper>>,
        default_provider: impl Into<String>,
        mcp_client: Arc<McpClient>,
        hooks: Arc<HookPipeline>,
        store: Arc<InteractionStore>,
        max_iterations: u32,
    ) -> Self {
        Self {
            configured,
            clients,
            default_provider: default_provider.into(),
            mcp_client,
            hooks,
            store,
            max_iterations,
        }
    }

    pub fn create_agent(&self, spec: &StageAgentSpec) -> Result<AgentRuntime, TarsyError> {
        let definition = match &spec.agent_ref {
            AgentRef::BuiltIn(type_name) => built_in_agent_definition(type_name)
                .ok_or_else(|| TarsyError::internal(format!("unknown built-in agent type '{type_name}'")))?,
            AgentRef::Configurable(config_name) => self
                .configured
                .get(config_name)
                .cloned()
                .ok_or_else(|| TarsyError::internal(format!("no configured agent named '{config_name}'")))?,
        };

        let provider = spec.llm_provider.as_deref().unwrap_or(&self.default_provider);
        let client = self
            .clients
            .get(provider)
            .cloned()
            .ok_or_else(|| TarsyError::internal(format!("no llm client registered for provider '{provider}'")))?;

        Ok(AgentRuntime::new(
            definition,
            client,
            self.mcp_client.clone(),
            self.hooks.clone(),
            self.store.clone(),
            self.max_iterations,
        ))
    }
}
