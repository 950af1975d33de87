use async_trait::async_trait;
use mcp::{McpClient, McpServerRegistry, NullWarningSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use store::{EventBus, InteractionStore, RetryPolicy};
use tarsy::{
    AgentDefinition, AgentFactory, AgentRef, ChainDefinition, ChainExecutor, ChainOutcome, ChainRegistry, ChainStage,
    ChainContext, ClientWrapper, ConfiguredAgentRegistry, CreateOutcome, FailurePolicy, HookConfig, HookPipeline,
    IterationControllerConfig, Message, NativeToolCall, SessionService, StageAgentSpec, TokenUsage, ToolDefinition,
};

/// A client that always answers immediately with a fixed final message.
struct ImmediateAnswerClient {
    answer: String,
}

#[async_trait]
impl ClientWrapper for ImmediateAnswerClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Message {
            role: tarsy::Role::Assistant,
            content: self.answer.clone().into(),
            tool_calls: vec![],
        })
    }

    fn model_name(&self) -> &str {
        "mock-immediate"
    }
}

/// A client that never produces a final answer: every turn requests a tool
/// that resolves to no registered server, driving the ReAct loop straight to
/// its iteration cap.
struct NeverFinishingClient {
    calls: AtomicU32,
}

#[async_trait]
impl ClientWrapper for NeverFinishingClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Message {
            role: tarsy::Role::Assistant,
            content: "still working".into(),
            tool_calls: vec![NativeToolCall {
                id: format!("call-{n}"),
                name: "nonexistent_tool".to_string(),
                arguments: serde_json::json!({}),
            }],
        })
    }

    fn model_name(&self) -> &str {
        "mock-never-finishing"
    }
}

async fn test_store() -> Arc<InteractionStore> {
    Arc::new(
        InteractionStore::connect("sqlite::memory:", RetryPolicy::default())
            .await
            .expect("in-memory sqlite store connects"),
    )
}

fn test_mcp_client() -> Arc<McpClient> {
    Arc::new(McpClient::new(McpServerRegistry::new(), Arc::new(NullWarningSink)))
}

fn single_stage_chain(agent_name: &str) -> ChainDefinition {
    ChainDefinition {
        chain_id: "test-chain".to_string(),
        alert_types: vec!["PodCrashLooping".to_string()],
        stages: vec![ChainStage::Single {
            name: "investigate".to_string(),
            agent: StageAgentSpec {
                name: agent_name.to_string(),
                agent_ref: AgentRef::Configurable(agent_name.to_string()),
                llm_provider: None,
            },
            failure_policy: FailurePolicy::All,
        }],
    }
}

#[tokio::test]
async fn happy_path_completes_session_with_final_summary() {
    let store = test_store().await;
    let events = Arc::new(EventBus::new(store.pool().clone(), store::BackendKind::Sqlite, RetryPolicy::default()));
    let hooks = Arc::new(HookPipeline::new(store.clone(), events, HookConfig::default()));

    let mut configured = ConfiguredAgentRegistry::new();
    configured.register(
        "diagnoser",
        AgentDefinition::new("diagnoser", "Diagnoser", "Diagnose the alert."),
    );

    let mut clients: std::collections::HashMap<String, Arc<dyn ClientWrapper>> = std::collections::HashMap::new();
    clients.insert(
        "default".to_string(),
        Arc::new(ImmediateAnswerClient {
            answer: "root cause: pod OOMKilled".to_string(),
        }),
    );

    let factory = Arc::new(AgentFactory::new(
        configured,
        clients,
        "default",
        test_mcp_client(),
        hooks.clone(),
        store.clone(),
        IterationControllerConfig::default().max_iterations,
    ));

    let executor = ChainExecutor::new(store.clone(), hooks, factory);
    let chain = single_stage_chain("diagnoser");

    let session_service = SessionService::new(store.clone());
    let session_id = match session_service
        .create("PodCrashLooping", &chain.chain_id, &serde_json::json!({"pod": "web-1"}), None)
        .await
        .unwrap()
    {
        CreateOutcome::Created { session_id } => session_id,
        CreateOutcome::Duplicate { .. } => panic!("expected a fresh session"),
    };

    let mut context = ChainContext::new(session_id.clone(), serde_json::json!({"pod": "web-1"}));
    let cancellation = tarsy::CancellationToken::new();

    let outcome = executor.run(&chain, &mut context, 0, None, &cancellation).await.unwrap();
    assert_eq!(outcome, ChainOutcome::Completed);

    let session = store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, "completed");
    assert_eq!(session.final_summary.as_deref(), Some("root cause: pod OOMKilled"));
}

#[tokio::test]
async fn duplicate_alert_reuses_in_flight_session() {
    let store = test_store().await;
    let session_service = SessionService::new(store.clone());

    let payload = serde_json::json!({"pod": "web-1", "namespace": "prod"});
    let first = session_service
        .create("PodCrashLooping", "chain-1", &payload, None)
        .await
        .unwrap();
    let first_id = match first {
        CreateOutcome::Created { session_id } => session_id,
        CreateOutcome::Duplicate { .. } => panic!("first submission should not be a duplicate"),
    };

    // Same alert type and payload (key order reshuffled) while still pending.
    let reshuffled = serde_json::json!({"namespace": "prod", "pod": "web-1"});
    let second = session_service
        .create("PodCrashLooping", "chain-1", &reshuffled, None)
        .await
        .unwrap();

    match second {
        CreateOutcome::Duplicate { session_id } => assert_eq!(session_id, first_id),
        CreateOutcome::Created { .. } => panic!("expected the second submission to dedupe against the first"),
    }
}

#[tokio::test]
async fn pause_on_iteration_cap_marks_session_paused() {
    let store = test_store().await;
    let events = Arc::new(EventBus::new(store.pool().clone(), store::BackendKind::Sqlite, RetryPolicy::default()));
    let hooks = Arc::new(HookPipeline::new(store.clone(), events, HookConfig::default()));

    let mut configured = ConfiguredAgentRegistry::new();
    configured.register("stuck", AgentDefinition::new("stuck", "Stuck Agent", "Keep trying."));

    let mut clients: std::collections::HashMap<String, Arc<dyn ClientWrapper>> = std::collections::HashMap::new();
    clients.insert(
        "default".to_string(),
        Arc::new(NeverFinishingClient { calls: AtomicU32::new(0) }),
    );

    let max_iterations = 3;
    let factory = Arc::new(AgentFactory::new(
        configured,
        clients,
        "default",
        test_mcp_client(),
        hooks.clone(),
        store.clone(),
        max_iterations,
    ));

    let executor = ChainExecutor::new(store.clone(), hooks, factory);
    let chain = single_stage_chain("stuck");

    store
        .create_session("s-pause", "key-pause", &chain.chain_id, 1_000, &serde_json::json!({}))
        .await
        .unwrap();
    let mut context = ChainContext::new("s-pause", serde_json::json!({}));
    let cancellation = tarsy::CancellationToken::new();

    let outcome = executor.run(&chain, &mut context, 0, None, &cancellation).await.unwrap();
    assert_eq!(outcome, ChainOutcome::Paused);

    let session = store.get_session("s-pause").await.unwrap().unwrap();
    assert_eq!(session.status, "paused");
}

#[tokio::test]
async fn cancellation_before_first_stage_marks_session_cancelled() {
    let store = test_store().await;
    let events = Arc::new(EventBus::new(store.pool().clone(), store::BackendKind::Sqlite, RetryPolicy::default()));
    let hooks = Arc::new(HookPipeline::new(store.clone(), events, HookConfig::default()));

    let configured = ConfiguredAgentRegistry::new();
    let clients: std::collections::HashMap<String, Arc<dyn ClientWrapper>> = std::collections::HashMap::new();
    let factory = Arc::new(AgentFactory::new(
        configured,
        clients,
        "default",
        test_mcp_client(),
        hooks.clone(),
        store.clone(),
        5,
    ));
    let executor = ChainExecutor::new(store.clone(), hooks, factory);
    let chain = single_stage_chain("unused");

    store
        .create_session("s-cancel", "key-cancel", &chain.chain_id, 1_000, &serde_json::json!({}))
        .await
        .unwrap();
    let mut context = ChainContext::new("s-cancel", serde_json::json!({}));
    let cancellation = tarsy::CancellationToken::new();
    cancellation.cancel();

    let outcome = executor.run(&chain, &mut context, 0, None, &cancellation).await.unwrap();
    assert_eq!(outcome, ChainOutcome::Cancelled);

    let session = store.get_session("s-cancel").await.unwrap().unwrap();
    assert_eq!(session.status, "cancelled");
}
