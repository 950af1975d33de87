//! Tarsy core: a durable claim-based work queue, chain/stage executor, ReAct
//! iteration controller, typed hook pipeline, and database-backed event bus
//! for incident-response automation.

pub mod agent_runtime;
pub mod chain_context;
pub mod chain_executor;
pub mod chain_registry;
pub mod claim_worker;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod error;
pub mod hooks;
pub mod iteration_controller;
pub mod parallel_stage;
pub mod sanitize;
pub mod session_service;
pub mod warnings;

pub use agent_runtime::{AgentDefinition, AgentOutcome, AgentRuntime};
pub use chain_context::{AgentExecutionResult, ChainContext, ParallelStageResult, StageOutput};
pub use chain_executor::{ChainExecutor, ChainOutcome};
pub use chain_registry::{
    built_in_agent_definition, AgentFactory, AgentRef, ChainDefinition, ChainRegistry, ChainRegistryError,
    ChainStage, ConfiguredAgentRegistry, StageAgentSpec,
};
pub use claim_worker::{run_stale_session_reaper, ClaimWorker};
pub use client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, TokenUsage, ToolDefinition};
pub use config::{ClaimWorkerConfig, HealthMonitorConfig, HookConfig, IterationControllerConfig, TarsyConfig};
pub use error::{ErrorKind, TarsyError};
pub use hooks::HookPipeline;
pub use iteration_controller::{CancellationToken, IterationController, IterationOutcome};
pub use parallel_stage::{FailurePolicy, ParallelChild, ParallelStageExecutor, StageStatus};
pub use sanitize::sanitize_alert_payload;
pub use session_service::{CreateOutcome, SessionCancelFlag, SessionService};
pub use warnings::{McpWarningSinkAdapter, Warning, WarningCategory, WarningsRegistry};
