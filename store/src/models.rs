//! Row types returned by the interaction store and event bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Paused => "paused",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "paused" => Some(SessionStatus::Paused),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled)
    }
}

/// An alert-processing session: the unit the claim worker dequeues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSession {
    pub session_id: String,
    pub alert_key: String,
    pub chain_id: String,
    pub status: String,
    pub pod_id: Option<String>,
    pub current_stage_index: i64,
    pub created_at_us: i64,
    pub started_at_us: Option<i64>,
    pub completed_at_us: Option<i64>,
    pub alert_payload: Value,
    pub final_summary: Option<String>,
}

/// One stage's execution record within a chain, possibly a replicated
/// parallel stage (`is_parallel_stage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub stage_execution_id: String,
    pub session_id: String,
    pub stage_index: i64,
    pub agent_id: String,
    pub status: String,
    pub is_parallel_stage: bool,
    pub started_at_us: Option<i64>,
    pub completed_at_us: Option<i64>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    /// Count of ReAct iterations completed so far; persisted on every
    /// increment so a paused stage resumes at the right point instead of
    /// restarting its loop at 0.
    pub current_iteration: i64,
    /// Full conversation as of the last persisted iteration, in the
    /// iteration controller's lossless wire format. `None` until the stage's
    /// first iteration completes.
    pub conversation_state: Option<Value>,
}

/// One LLM call, with full prompt/response retained for replay and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteraction {
    pub interaction_id: String,
    pub session_id: String,
    pub stage_execution_id: String,
    pub iteration: i64,
    pub provider: String,
    pub model: String,
    pub request_messages: Value,
    pub response_text: Option<String>,
    pub tool_calls: Option<Value>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub created_at_us: i64,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// One MCP tool call, stored post-masking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpInteraction {
    pub interaction_id: String,
    pub session_id: String,
    pub stage_execution_id: String,
    pub iteration: i64,
    pub server_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result_text: Option<String>,
    pub is_error: bool,
    pub created_at_us: i64,
    pub duration_ms: Option<i64>,
}

/// A single published event on the event bus, with a per-channel monotonic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub channel: String,
    pub event_id: i64,
    pub event_type: String,
    pub payload: Value,
    pub created_at_us: i64,
}
