//! C3 Typed Hook Pipeline.
//!
//! Every LLM and MCP call the iteration controller makes is routed through
//! here before the controller sees the result. Two hooks run: the history
//! hook persists the interaction (with truncation) to the interaction store,
//! and the event hook publishes a notification on the event bus. MCP tool
//! results are already masked by the time they reach this pipeline — masking
//! is applied inside the `mcp` crate's `call_tool`, which is the only place
//! that holds the per-server masking rules — so "masking before history"
//! holds by construction rather than by hook ordering here.
//!
//! Each hook has its own error budget per session: a hook that keeps failing
//! (e.g. the database is down) stops being invoked for the rest of the
//! session rather than taking down the iteration it's observing.

use crate::config::HookConfig;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use store::models::{LlmInteraction, McpInteraction};
use store::{EventBus, InteractionStore};

/// Keeps a head and tail slice (split evenly from `threshold`) joined by a
/// `[HOOK TRUNCATED n bytes]` marker, so the end of a message — often where a
/// tool error or exception lives — survives truncation alongside the start.
fn truncate_field(value: &str, threshold: usize) -> String {
    if value.len() <= threshold {
        return value.to_string();
    }
    let half = threshold / 2;
    let head_end = floor_char_boundary(value, half);
    let tail_start = ceil_char_boundary(value, value.len() - half);
    let dropped = tail_start.saturating_sub(head_end);
    format!(
        "{}[HOOK TRUNCATED {} bytes]{}",
        &value[..head_end],
        dropped,
        &value[tail_start..]
    )
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

struct ErrorBudget {
    remaining: AtomicU32,
}

impl ErrorBudget {
    fn new(max: u32) -> Self {
        Self {
            remaining: AtomicU32::new(max),
        }
    }

    /// Returns `true` if the caller should still attempt the hook.
    fn consume_on_error(&self) -> bool {
        let prev = self.remaining.load(Ordering::Relaxed);
        if prev == 0 {
            return false;
        }
        self.remaining.fetch_sub(1, Ordering::Relaxed);
        true
    }

    fn is_exhausted(&self) -> bool {
        self.remaining.load(Ordering::Relaxed) == 0
    }
}

pub struct HookPipeline {
    store: Arc<InteractionStore>,
    events: Arc<EventBus>,
    config: HookConfig,
    history_budget: ErrorBudget,
    event_budget: ErrorBudget,
}

impl HookPipeline {
    pub fn new(store: Arc<InteractionStore>, events: Arc<EventBus>, config: HookConfig) -> Self {
        let max = config.max_hook_errors_per_session;
        Self {
            store,
            events,
            history_budget: ErrorBudget::new(max),
            event_budget: ErrorBudget::new(max),
            config,
        }
    }

    pub async fn on_llm_interaction(&self, mut interaction: LlmInteraction) {
        interaction.request_messages = truncate_json_strings(
            interaction.request_messages,
            self.config.truncation_threshold_bytes,
        );
        if let Some(text) = interaction.response_text.take() {
            interaction.response_text = Some(truncate_field(&text, self.config.truncation_threshold_bytes));
        }

        if !self.history_budget.is_exhausted() {
            if let Err(e) = self.store.store_llm_interaction(&interaction).await {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("history hook failed to persist llm interaction: {e}");
                }
                self.history_budget.consume_on_error();
            }
        }

        if !self.event_budget.is_exhausted() {
            let payload = serde_json::json!({
                "stage_execution_id": interaction.stage_execution_id,
                "iteration": interaction.iteration,
                "provider": interaction.provider,
            });
            if let Err(e) = self
                .events
                .publish(&format!("session.{}", interaction.session_id), "llm.interaction", &payload)
                .await
            {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("event hook failed to publish llm interaction event: {e}");
                }
                self.event_budget.consume_on_error();
            }
        }
    }

    pub async fn on_mcp_interaction(&self, mut interaction: McpInteraction) {
        if let Some(text) = interaction.result_text.take() {
            interaction.result_text = Some(truncate_field(&text, self.config.truncation_threshold_bytes));
        }

        if !self.history_budget.is_exhausted() {
            if let Err(e) = self.store.store_mcp_interaction(&interaction).await {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("history hook failed to persist mcp interaction: {e}");
                }
                self.history_budget.consume_on_error();
            }
        }

        if !self.event_budget.is_exhausted() {
            let payload = serde_json::json!({
                "stage_execution_id": interaction.stage_execution_id,
                "iteration": interaction.iteration,
                "server_id": interaction.server_id,
                "tool_name": interaction.tool_name,
                "is_error": interaction.is_error,
            });
            if let Err(e) = self
                .events
                .publish(&format!("session.{}", interaction.session_id), "mcp.interaction", &payload)
                .await
            {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("event hook failed to publish mcp interaction event: {e}");
                }
                self.event_budget.consume_on_error();
            }
        }
    }

    pub async fn on_stage_event(&self, session_id: &str, event_type: &str, payload: Value) {
        if self.event_budget.is_exhausted() {
            return;
        }
        if let Err(e) = self.events.publish(&format!("session.{session_id}"), event_type, &payload).await {
            if log::log_enabled!(log::Level::Error) {
                log::error!("event hook failed to publish '{event_type}': {e}");
            }
            self.event_budget.consume_on_error();
        }
    }
}

/// Apply [`truncate_field`] to every string leaf in a JSON value, mirroring
/// the leaf-only traversal `sanitize_alert_payload` uses.
fn truncate_json_strings(value: Value, threshold: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_field(&s, threshold)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| truncate_json_strings(v, threshold))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_json_strings(v, threshold)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_field_leaves_short_values_untouched() {
        assert_eq!(truncate_field("short", 100), "short");
    }

    #[test]
    fn truncate_field_keeps_head_and_tail_past_threshold() {
        let long = format!("{}{}", "a".repeat(5), "b".repeat(5));
        let truncated = truncate_field(&long, 4);
        assert!(truncated.starts_with("aa"));
        assert!(truncated.ends_with("bb"));
        assert!(truncated.contains("[HOOK TRUNCATED 6 bytes]"));
    }

    #[test]
    fn truncate_field_is_char_boundary_safe() {
        let long = "é".repeat(10);
        let truncated = truncate_field(&long, 5);
        assert!(truncated.contains("[HOOK TRUNCATED"));
    }

    #[test]
    fn error_budget_stops_after_exhaustion() {
        let budget = ErrorBudget::new(2);
        assert!(budget.consume_on_error());
        assert!(budget.consume_on_error());
        assert!(budget.is_exhausted());
        assert!(!budget.consume_on_error());
    }
}
