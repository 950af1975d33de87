//! C10 Chain Executor: runs one claimed session's chain stages in order,
//! threading stage outputs forward through a [`ChainContext`] and handling
//! stage-level pause/failure/cancellation per the chain's failure policies.

use crate::chain_context::{ChainContext, StageOutput};
use crate::chain_registry::{ChainDefinition, ChainStage};
use crate::client_wrapper::Message;
use crate::error::TarsyError;
use crate::hooks::HookPipeline;
use crate::iteration_controller::{conversation_from_json, CancellationToken};
use crate::parallel_stage::{FailurePolicy as StageFailurePolicy, ParallelChild, ParallelStageExecutor, StageStatus};
use crate::chain_registry::AgentFactory;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use store::models::{SessionStatus, StageExecution};
use store::InteractionStore;
use uuid::Uuid;

/// A paused single-agent stage's saved progress, reloaded so resuming it
/// continues the same conversation at the same iteration instead of
/// restarting the ReAct loop from scratch.
struct StageResumeState {
    stage_execution_id: String,
    starting_iteration: u32,
    messages: Vec<Message>,
}

pub struct ChainExecutor {
    store: Arc<InteractionStore>,
    hooks: Arc<HookPipeline>,
    agent_factory: Arc<AgentFactory>,
    parallel_executor: ParallelStageExecutor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl ChainExecutor {
    pub fn new(store: Arc<InteractionStore>, hooks: Arc<HookPipeline>, agent_factory: Arc<AgentFactory>) -> Self {
        Self {
            parallel_executor: ParallelStageExecutor::new(store.clone()),
            store,
            hooks,
            agent_factory,
        }
    }

    /// Run `chain` starting at `context.session_id`'s `starting_stage_index`
    /// (0 for a fresh session, the persisted `current_stage_index` on
    /// resume). `alert_payload`/`runbook_text` are folded into every stage's
    /// user prompt alongside the previous stage's output.
    pub async fn run(
        &self,
        chain: &ChainDefinition,
        context: &mut ChainContext,
        starting_stage_index: usize,
        runbook_text: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<ChainOutcome, TarsyError> {
        self.hooks
            .on_stage_event(&context.session_id, "session.started", serde_json::json!({"chain_id": chain.chain_id}))
            .await;

        self.rehydrate_completed_stages(context, starting_stage_index).await?;

        for (stage_index, stage) in chain.stages.iter().enumerate().skip(starting_stage_index) {
            if cancellation.is_cancelled() {
                self.finish(&context.session_id, ChainOutcome::Cancelled, None).await?;
                return Ok(ChainOutcome::Cancelled);
            }

            self.store.set_current_stage_index(&context.session_id, stage_index as i64).await?;

            let user_prompt = self.build_stage_prompt(context, runbook_text, stage_index);

            let (status, output) = if stage.is_parallel() {
                self.run_parallel_stage(context, stage, stage_index, &user_prompt, cancellation).await?
            } else {
                let resume = if stage_index == starting_stage_index {
                    self.load_resume_state(&context.session_id, stage_index).await?
                } else {
                    None
                };
                self.run_single_stage(context, stage, stage_index, &user_prompt, resume, cancellation).await?
            };

            context.record_stage_output(stage_index, output);

            match status {
                StageStatus::Completed => continue,
                StageStatus::Paused => {
                    self.finish(&context.session_id, ChainOutcome::Paused, None).await?;
                    return Ok(ChainOutcome::Paused);
                }
                StageStatus::Cancelled => {
                    self.finish(&context.session_id, ChainOutcome::Cancelled, None).await?;
                    return Ok(ChainOutcome::Cancelled);
                }
                StageStatus::Failed => {
                    let policy = stage_failure_policy(stage);
                    if policy == StageFailurePolicy::Continue {
                        continue;
                    }
                    self.finish(
                        &context.session_id,
                        ChainOutcome::Failed,
                        Some(format!("stage '{}' failed", stage.name())),
                    )
                    .await?;
                    return Ok(ChainOutcome::Failed);
                }
            }
        }

        let final_summary = self.format_final_analysis(chain, context);
        self.finish(&context.session_id, ChainOutcome::Completed, Some(final_summary)).await?;
        Ok(ChainOutcome::Completed)
    }

    /// Reloads every stage before `starting_stage_index` from the store into
    /// `context.stage_outputs`, so a resumed chain's later stages and its
    /// final summary still see the prior stages' results instead of an empty
    /// map. A no-op for a fresh session, where `starting_stage_index` is 0.
    async fn rehydrate_completed_stages(
        &self,
        context: &mut ChainContext,
        starting_stage_index: usize,
    ) -> Result<(), TarsyError> {
        if starting_stage_index == 0 {
            return Ok(());
        }

        let executions = self.store.list_stage_executions(&context.session_id).await?;
        let mut by_index: HashMap<i64, Vec<StageExecution>> = HashMap::new();
        for execution in executions {
            by_index.entry(execution.stage_index).or_default().push(execution);
        }

        for stage_index in 0..starting_stage_index {
            if context.stage_output(stage_index).is_some() {
                continue;
            }
            let Some(rows) = by_index.get(&(stage_index as i64)) else {
                continue;
            };
            // A parallel stage has one parent row (`is_parallel_stage`) plus
            // one row per child; a single-agent stage has exactly one row.
            let representative = rows.iter().find(|r| r.is_parallel_stage).or_else(|| rows.first());
            if let Some(output) = representative.and_then(|r| r.output.as_ref()).and_then(StageOutput::from_json) {
                context.record_stage_output(stage_index, output);
            }
        }
        Ok(())
    }

    /// If the stage at `stage_index` was previously paused mid-ReAct-loop,
    /// reloads its persisted conversation and iteration count so it can be
    /// continued rather than restarted. Only single-agent stages persist a
    /// resumable conversation; returns `None` for anything else (including a
    /// fresh session, where no row for this stage exists yet).
    async fn load_resume_state(&self, session_id: &str, stage_index: usize) -> Result<Option<StageResumeState>, TarsyError> {
        let executions = self.store.list_stage_executions(session_id).await?;
        let paused = executions
            .into_iter()
            .find(|e| e.stage_index == stage_index as i64 && !e.is_parallel_stage && e.status == "paused");
        let Some(row) = paused else {
            return Ok(None);
        };
        let messages = row.conversation_state.as_ref().and_then(conversation_from_json).unwrap_or_default();
        if messages.is_empty() {
            return Ok(None);
        }
        Ok(Some(StageResumeState {
            stage_execution_id: row.stage_execution_id,
            starting_iteration: row.current_iteration as u32,
            messages,
        }))
    }

    fn build_stage_prompt(&self, context: &ChainContext, runbook_text: Option<&str>, stage_index: usize) -> String {
        let mut prompt = String::new();
        prompt.push_str("Alert payload:\n");
        prompt.push_str(&serde_json::to_string_pretty(&context.alert_payload).unwrap_or_default());
        if let Some(runbook) = runbook_text {
            prompt.push_str("\n\nRunbook:\n");
            prompt.push_str(runbook);
        }
        if stage_index > 0 {
            if let Some(previous) = context.stage_output(stage_index - 1) {
                prompt.push_str("\n\nPrevious stage output:\n");
                prompt.push_str(&serde_json::to_string_pretty(&previous.as_json()).unwrap_or_default());
            }
        }
        prompt
    }

    async fn run_single_stage(
        &self,
        context: &ChainContext,
        stage: &ChainStage,
        stage_index: usize,
        user_prompt: &str,
        resume: Option<StageResumeState>,
        cancellation: &CancellationToken,
    ) -> Result<(StageStatus, StageOutput), TarsyError> {
        let ChainStage::Single { agent, .. } = stage else {
            unreachable!("run_single_stage called with a non-single stage");
        };

        let runtime = self.agent_factory.create_agent(agent)?;

        let (stage_execution_id, starting_iteration, resume_messages) = match resume {
            Some(state) => (state.stage_execution_id, state.starting_iteration, Some(state.messages)),
            None => {
                let stage_execution_id = Uuid::new_v4().to_string();
                self.store
                    .create_stage_execution(&stage_execution_id, &context.session_id, stage_index as i64, &agent.name, false, now_us())
                    .await?;
                (stage_execution_id, 0, None)
            }
        };

        let outcome = runtime
            .run(&context.session_id, &stage_execution_id, user_prompt, starting_iteration, resume_messages, cancellation)
            .await;

        use crate::agent_runtime::AgentOutcome;
        match outcome {
            Ok(AgentOutcome::Completed(result)) => {
                let output_json = StageOutput::Single(result.clone()).as_json();
                self.store
                    .update_stage_execution(&stage_execution_id, "completed", now_us(), Some(&output_json), None)
                    .await?;
                Ok((StageStatus::Completed, StageOutput::Single(result)))
            }
            Ok(AgentOutcome::Paused { current_iteration }) => {
                let message = format!("MAX_ITERATIONS_REACHED at iteration {current_iteration}");
                self.store
                    .update_stage_execution(&stage_execution_id, "paused", now_us(), None, Some(&message))
                    .await?;
                Ok((
                    StageStatus::Paused,
                    StageOutput::Single(crate::chain_context::AgentExecutionResult {
                        agent_id: agent.name.clone(),
                        summary: "paused".to_string(),
                        iterations_used: current_iteration,
                        output: Value::Null,
                    }),
                ))
            }
            Ok(AgentOutcome::Cancelled { .. }) => {
                self.store
                    .update_stage_execution(&stage_execution_id, "failed", now_us(), None, Some("cancelled"))
                    .await?;
                Ok((
                    StageStatus::Cancelled,
                    StageOutput::Single(crate::chain_context::AgentExecutionResult {
                        agent_id: agent.name.clone(),
                        summary: "cancelled".to_string(),
                        iterations_used: 0,
                        output: Value::Null,
                    }),
                ))
            }
            // A transport/semantic error from the agent run must still go
            // through this stage's failure policy (below in `run`), not
            // escape the whole chain via `?` and strand the session.
            Err(e) => {
                let message = e.to_string();
                self.store
                    .update_stage_execution(&stage_execution_id, "failed", now_us(), None, Some(&message))
                    .await?;
                Ok((
                    StageStatus::Failed,
                    StageOutput::Single(crate::chain_context::AgentExecutionResult {
                        agent_id: agent.name.clone(),
                        summary: format!("stage error: {message}"),
                        iterations_used: 0,
                        output: Value::Null,
                    }),
                ))
            }
        }
    }

    async fn run_parallel_stage(
        &self,
        context: &ChainContext,
        stage: &ChainStage,
        stage_index: usize,
        user_prompt: &str,
        cancellation: &CancellationToken,
    ) -> Result<(StageStatus, StageOutput), TarsyError> {
        let (children_specs, policy) = match stage {
            ChainStage::MultiAgent { agents, failure_policy, .. } => {
                (agents.iter().map(|a| (a.name.clone(), a.clone())).collect::<Vec<_>>(), *failure_policy)
            }
            ChainStage::Replicated { agent, replicas, failure_policy, .. } => {
                let names = ParallelStageExecutor::replica_names(&agent.name, *replicas);
                (names.into_iter().map(|n| (n, agent.clone())).collect::<Vec<_>>(), *failure_policy)
            }
            ChainStage::Single { .. } => unreachable!("run_parallel_stage called with a single stage"),
        };

        let mut children = Vec::with_capacity(children_specs.len());
        for (name, spec) in children_specs {
            let runtime = Arc::new(self.agent_factory.create_agent(&spec)?);
            children.push(ParallelChild { name, runtime });
        }

        let (status, result) = self
            .parallel_executor
            .run(&context.session_id, stage_index as i64, children, user_prompt, policy, cancellation)
            .await?;

        Ok((status, StageOutput::Parallel(result)))
    }

    fn format_final_analysis(&self, chain: &ChainDefinition, context: &ChainContext) -> String {
        let last_index = chain.stages.len().saturating_sub(1);
        match context.stage_output(last_index) {
            Some(StageOutput::Single(result)) => result.summary.clone(),
            Some(StageOutput::Parallel(result)) => result
                .results
                .iter()
                .map(|r| format!("[{}] {}", r.agent_id, r.summary))
                .collect::<Vec<_>>()
                .join("\n\n"),
            None => String::new(),
        }
    }

    async fn finish(&self, session_id: &str, outcome: ChainOutcome, final_summary: Option<String>) -> Result<(), TarsyError> {
        let (status, event) = match outcome {
            ChainOutcome::Completed => (SessionStatus::Completed, "session.completed"),
            ChainOutcome::Failed => (SessionStatus::Failed, "session.failed"),
            ChainOutcome::Paused => (SessionStatus::Paused, "session.paused"),
            ChainOutcome::Cancelled => (SessionStatus::Cancelled, "session.cancelled"),
        };
        let completed_at_us = matches!(status, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled)
            .then(now_us);
        self.store
            .update_session_status(session_id, status, completed_at_us, final_summary.as_deref())
            .await?;
        self.hooks.on_stage_event(session_id, event, serde_json::json!({})).await;
        Ok(())
    }
}

fn stage_failure_policy(stage: &ChainStage) -> StageFailurePolicy {
    match stage {
        ChainStage::Single { failure_policy, .. } => *failure_policy,
        ChainStage::MultiAgent { failure_policy, .. } => *failure_policy,
        ChainStage::Replicated { failure_policy, .. } => *failure_policy,
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
