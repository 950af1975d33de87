//! C9 Parallel Stage Executor: runs a stage's agents concurrently (either a
//! genuinely multi-agent stage or one agent replicated N times), aggregates
//! their outcomes under a failure policy, and persists the parent/child
//! stage execution rows.
//!
//! Fan-out follows the teacher orchestration module's parallel-round
//! pattern: one `tokio::spawn` per child, joined back into a single
//! collection point.

use crate::agent_runtime::{AgentOutcome, AgentRuntime};
use crate::chain_context::{AgentExecutionResult, ParallelStageResult, StageOutput};
use crate::error::TarsyError;
use crate::iteration_controller::CancellationToken;
use std::sync::Arc;
use store::InteractionStore;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    All,
    Any,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Failed,
    Paused,
    Cancelled,
}

pub struct ParallelChild {
    pub name: String,
    pub runtime: Arc<AgentRuntime>,
}

pub struct ParallelStageExecutor {
    store: Arc<InteractionStore>,
}

impl ParallelStageExecutor {
    pub fn new(store: Arc<InteractionStore>) -> Self {
        Self { store }
    }

    /// Synthesize child names for a replicated stage: `"{base}-{k}"` for
    /// k in 1..=replicas.
    pub fn replica_names(base: &str, replicas: usize) -> Vec<String> {
        (1..=replicas).map(|k| format!("{base}-{k}")).collect()
    }

    pub async fn run(
        &self,
        session_id: &str,
        stage_index: i64,
        children: Vec<ParallelChild>,
        user_prompt: &str,
        policy: FailurePolicy,
        cancellation: &CancellationToken,
    ) -> Result<(StageStatus, ParallelStageResult), TarsyError> {
        let parent_id = Uuid::new_v4().to_string();
        self.store
            .create_stage_execution(&parent_id, session_id, stage_index, "parallel", true, now_us())
            .await?;

        let mut tasks = Vec::new();
        for child in children {
            let store = self.store.clone();
            let session_id = session_id.to_string();
            let user_prompt = user_prompt.to_string();
            let cancellation = cancellation.clone();

            tasks.push(tokio::spawn(async move {
                let child_execution_id = Uuid::new_v4().to_string();
                let _ = store
                    .create_stage_execution(&child_execution_id, &session_id, stage_index, &child.name, false, now_us())
                    .await;

                let outcome = child
                    .runtime
                    .run(&session_id, &child_execution_id, &user_prompt, 0, None, &cancellation)
                    .await;

                (child.name, child_execution_id, outcome)
            }));
        }

        let mut results = Vec::new();
        let mut failed_agent_ids = Vec::new();
        let mut any_paused = false;
        let mut any_cancelled = false;
        let mut completed_count = 0usize;

        for task in tasks {
            let (name, child_execution_id, outcome) = task
                .await
                .map_err(|e| TarsyError::internal(format!("parallel child task panicked: {e}")))?;

            match outcome {
                Ok(AgentOutcome::Completed(result)) => {
                    completed_count += 1;
                    let output_json = StageOutput::Single(result.clone()).as_json();
                    self.store
                        .update_stage_execution(&child_execution_id, "completed", now_us(), Some(&output_json), None)
                        .await?;
                    results.push(result);
                }
                Ok(AgentOutcome::Paused { current_iteration }) => {
                    any_paused = true;
                    let message = format!("MAX_ITERATIONS_REACHED at iteration {current_iteration}");
                    self.store
                        .update_stage_execution(&child_execution_id, "paused", now_us(), None, Some(&message))
                        .await?;
                    failed_agent_ids.push(name.clone());
                    results.push(AgentExecutionResult {
                        agent_id: name,
                        summary: "paused".to_string(),
                        iterations_used: current_iteration,
                        output: serde_json::Value::Null,
                    });
                }
                Ok(AgentOutcome::Cancelled { .. }) => {
                    any_cancelled = true;
                    self.store
                        .update_stage_execution(&child_execution_id, "failed", now_us(), None, Some("cancelled"))
                        .await?;
                    failed_agent_ids.push(name);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.store
                        .update_stage_execution(&child_execution_id, "failed", now_us(), None, Some(&message))
                        .await?;
                    failed_agent_ids.push(name);
                }
            }
        }

        let status = if any_cancelled {
            StageStatus::Cancelled
        } else if any_paused {
            StageStatus::Paused
        } else {
            match policy {
                FailurePolicy::All => {
                    if failed_agent_ids.is_empty() {
                        StageStatus::Completed
                    } else {
                        StageStatus::Failed
                    }
                }
                FailurePolicy::Any => {
                    if completed_count >= 1 {
                        StageStatus::Completed
                    } else {
                        StageStatus::Failed
                    }
                }
                FailurePolicy::Continue => StageStatus::Completed,
            }
        };

        let parent_status_str = match status {
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Paused => "paused",
            StageStatus::Cancelled => "cancelled",
        };

        let parallel_result = ParallelStageResult {
            results,
            failed_agent_ids,
        };

        let parent_output = StageOutput::Parallel(parallel_result.clone()).as_json();
        self.store
            .update_stage_execution(&parent_id, parent_status_str, now_us(), Some(&parent_output), None)
            .await?;

        Ok((status, parallel_result))
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
