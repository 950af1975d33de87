// src/lib.rs

pub mod tarsy;

pub use tarsy::{
    built_in_agent_definition, AgentDefinition, AgentExecutionResult, AgentFactory, AgentOutcome, AgentRef,
    AgentRuntime, CancellationToken, ChainContext, ChainDefinition, ChainExecutor, ChainOutcome, ChainRegistry,
    ChainRegistryError, ChainStage, ClaimWorker, ClaimWorkerConfig, ClientWrapper, ConfiguredAgentRegistry,
    CreateOutcome, ErrorKind, FailurePolicy, HealthMonitorConfig, HookConfig, HookPipeline,
    IterationController, IterationControllerConfig, IterationOutcome, McpWarningSinkAdapter, Message,
    NativeToolCall, ParallelChild, ParallelStageExecutor, ParallelStageResult, Role, run_stale_session_reaper,
    sanitize_alert_payload, SessionCancelFlag, SessionService, StageAgentSpec, StageOutput, StageStatus,
    TarsyConfig, TarsyError, TokenUsage, ToolDefinition, Warning, WarningCategory, WarningsRegistry,
};
