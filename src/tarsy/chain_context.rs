//! Data carried between stages of a chain execution (§3).

use serde_json::Value;
use std::collections::HashMap;

/// Output of a single agent's run within one stage.
#[derive(Debug, Clone)]
pub struct AgentExecutionResult {
    pub agent_id: String,
    pub summary: String,
    pub iterations_used: u32,
    pub output: Value,
}

/// Aggregated output of a replicated (fan-out) stage: one result per agent
/// replica, plus the failure policy's verdict on whether the stage as a
/// whole succeeded.
#[derive(Debug, Clone)]
pub struct ParallelStageResult {
    pub results: Vec<AgentExecutionResult>,
    pub failed_agent_ids: Vec<String>,
}

/// Sum type discriminated by `is_parallel_stage`, matching how the stage
/// executor reports its output back into the chain context regardless of
/// whether the stage ran one agent or many.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Single(AgentExecutionResult),
    Parallel(ParallelStageResult),
}

impl StageOutput {
    pub fn is_parallel_stage(&self) -> bool {
        matches!(self, StageOutput::Parallel(_))
    }

    pub fn as_json(&self) -> Value {
        match self {
            StageOutput::Single(r) => serde_json::json!({
                "is_parallel_stage": false,
                "agent_id": r.agent_id,
                "summary": r.summary,
                "iterations_used": r.iterations_used,
                "output": r.output,
            }),
            StageOutput::Parallel(p) => serde_json::json!({
                "is_parallel_stage": true,
                "results": p.results.iter().map(|r| serde_json::json!({
                    "agent_id": r.agent_id,
                    "summary": r.summary,
                    "iterations_used": r.iterations_used,
                    "output": r.output,
                })).collect::<Vec<_>>(),
                "failed_agent_ids": p.failed_agent_ids,
            }),
        }
    }

    /// Inverse of [`StageOutput::as_json`]; used to rehydrate a resumed
    /// chain's completed stages back into a [`ChainContext`]. `None` on any
    /// shape mismatch rather than panicking, since this only ever reads back
    /// rows this crate itself wrote.
    pub fn from_json(value: &Value) -> Option<Self> {
        if value.get("is_parallel_stage")?.as_bool()? {
            let results = value
                .get("results")?
                .as_array()?
                .iter()
                .filter_map(agent_result_from_json)
                .collect();
            let failed_agent_ids = value
                .get("failed_agent_ids")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            Some(StageOutput::Parallel(ParallelStageResult { results, failed_agent_ids }))
        } else {
            agent_result_from_json(value).map(StageOutput::Single)
        }
    }
}

fn agent_result_from_json(value: &Value) -> Option<AgentExecutionResult> {
    Some(AgentExecutionResult {
        agent_id: value.get("agent_id")?.as_str()?.to_string(),
        summary: value.get("summary")?.as_str()?.to_string(),
        iterations_used: value.get("iterations_used")?.as_u64()? as u32,
        output: value.get("output").cloned().unwrap_or(Value::Null),
    })
}

/// Accumulated state passed through a chain's stages. Each completed stage's
/// output is keyed by stage index so later stages (and the final summary)
/// can reference any prior stage's result, not just its immediate
/// predecessor.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub session_id: String,
    pub alert_payload: Value,
    pub stage_outputs: HashMap<usize, StageOutput>,
}

impl ChainContext {
    pub fn new(session_id: impl Into<String>, alert_payload: Value) -> Self {
        Self {
            session_id: session_id.into(),
            alert_payload,
            stage_outputs: HashMap::new(),
        }
    }

    pub fn record_stage_output(&mut self, stage_index: usize, output: StageOutput) {
        self.stage_outputs.insert(stage_index, output);
    }

    pub fn stage_output(&self, stage_index: usize) -> Option<&StageOutput> {
        self.stage_outputs.get(&stage_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stage_output_round_trips_through_json() {
        let output = StageOutput::Single(AgentExecutionResult {
            agent_id: "kubernetes-agent".to_string(),
            summary: "pods healthy".to_string(),
            iterations_used: 3,
            output: serde_json::json!({"checked": 5}),
        });
        let restored = StageOutput::from_json(&output.as_json()).expect("round trip should succeed");
        match restored {
            StageOutput::Single(r) => {
                assert_eq!(r.agent_id, "kubernetes-agent");
                assert_eq!(r.iterations_used, 3);
            }
            StageOutput::Parallel(_) => panic!("expected single stage output"),
        }
    }

    #[test]
    fn parallel_stage_output_round_trips_through_json() {
        let output = StageOutput::Parallel(ParallelStageResult {
            results: vec![AgentExecutionResult {
                agent_id: "runbook-agent-1".to_string(),
                summary: "done".to_string(),
                iterations_used: 1,
                output: serde_json::Value::Null,
            }],
            failed_agent_ids: vec!["runbook-agent-2".to_string()],
        });
        let restored = StageOutput::from_json(&output.as_json()).expect("round trip should succeed");
        match restored {
            StageOutput::Parallel(p) => {
                assert_eq!(p.results.len(), 1);
                assert_eq!(p.failed_agent_ids, vec!["runbook-agent-2".to_string()]);
            }
            StageOutput::Single(_) => panic!("expected parallel stage output"),
        }
    }
}
