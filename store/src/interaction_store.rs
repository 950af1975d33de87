//! C1 Interaction Store: durable session/stage/LLM/MCP persistence with
//! claim-based dequeue and cascade retention.

use crate::models::{AlertSession, LlmInteraction, McpInteraction, SessionStatus, StageExecution};
use crate::retry::RetryPolicy;
use crate::schema::{ddl_statements, BackendKind};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

pub struct InteractionStore {
    pool: AnyPool,
    backend: BackendKind,
    retry: RetryPolicy,
}

impl InteractionStore {
    pub async fn connect(database_url: &str, retry: RetryPolicy) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let backend = BackendKind::from_url(database_url);
        let pool = AnyPoolOptions::new()
            .max_connections(if backend == BackendKind::Sqlite { 1 } else { 10 })
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            backend,
            retry,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for statement in ddl_statements(self.backend) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_session(
        &self,
        session_id: &str,
        alert_key: &str,
        chain_id: &str,
        created_at_us: i64,
        alert_payload: &Value,
    ) -> Result<(), sqlx::Error> {
        let payload_text = serde_json::to_string(alert_payload).unwrap_or_default();
        self.retry
            .run("create_session", || async {
                sqlx::query(
                    "INSERT INTO alert_sessions \
                     (session_id, alert_key, chain_id, status, current_stage_index, created_at_us, alert_payload) \
                     VALUES (?, ?, ?, ?, 0, ?, ?)",
                )
                .bind(session_id)
                .bind(alert_key)
                .bind(chain_id)
                .bind(SessionStatus::Pending.as_str())
                .bind(created_at_us)
                .bind(&payload_text)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    /// Atomically transition one `pending` session to `in_progress` owned by
    /// `pod_id`, or `None` if the queue is empty. On Postgres this uses
    /// `FOR UPDATE SKIP LOCKED` so concurrent pods never race on the same row;
    /// SQLite serializes all writers so a plain `UPDATE ... RETURNING`
    /// transition is already atomic.
    pub async fn claim_next_pending_session(
        &self,
        pod_id: &str,
        now_us: i64,
    ) -> Result<Option<AlertSession>, sqlx::Error> {
        self.retry
            .run("claim_next_pending_session", || async {
                match self.backend {
                    BackendKind::Postgres => {
                        sqlx::query(
                            "UPDATE alert_sessions SET status = 'in_progress', pod_id = ?, started_at_us = ? \
                             WHERE session_id = ( \
                                 SELECT session_id FROM alert_sessions \
                                 WHERE status = 'pending' \
                                 ORDER BY created_at_us ASC \
                                 FOR UPDATE SKIP LOCKED \
                                 LIMIT 1 \
                             ) \
                             RETURNING *",
                        )
                        .bind(pod_id)
                        .bind(now_us)
                        .fetch_optional(&self.pool)
                        .await
                    }
                    BackendKind::Sqlite => {
                        sqlx::query(
                            "UPDATE alert_sessions SET status = 'in_progress', pod_id = ?, started_at_us = ? \
                             WHERE session_id = ( \
                                 SELECT session_id FROM alert_sessions \
                                 WHERE status = 'pending' \
                                 ORDER BY created_at_us ASC \
                                 LIMIT 1 \
                             ) \
                             RETURNING *",
                        )
                        .bind(pod_id)
                        .bind(now_us)
                        .fetch_optional(&self.pool)
                        .await
                    }
                }
            })
            .await
            .map(|row| row.map(|r| row_to_session(&r)))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<AlertSession>, sqlx::Error> {
        let row = self
            .retry
            .run("get_session", || async {
                sqlx::query("SELECT * FROM alert_sessions WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
        Ok(row.map(|r| row_to_session(&r)))
    }

    /// Used by session creation to dedupe concurrent identical alerts: a
    /// session with this alert key that hasn't reached a terminal status yet.
    pub async fn find_non_terminal_session_by_alert_key(&self, alert_key: &str) -> Result<Option<AlertSession>, sqlx::Error> {
        let row = self
            .retry
            .run("find_non_terminal_session_by_alert_key", || async {
                sqlx::query(
                    "SELECT * FROM alert_sessions \
                     WHERE alert_key = ? AND status NOT IN ('completed', 'failed', 'cancelled') \
                     ORDER BY created_at_us DESC LIMIT 1",
                )
                .bind(alert_key)
                .fetch_optional(&self.pool)
                .await
            })
            .await?;
        Ok(row.map(|r| row_to_session(&r)))
    }

    pub async fn count_sessions_by_status(&self, status: SessionStatus) -> Result<i64, sqlx::Error> {
        let row = self
            .retry
            .run("count_sessions_by_status", || async {
                sqlx::query("SELECT COUNT(*) AS c FROM alert_sessions WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await
            })
            .await?;
        Ok(row.try_get::<i64, _>("c").unwrap_or(0))
    }

    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        completed_at_us: Option<i64>,
        final_summary: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        self.retry
            .run("update_session_status", || async {
                sqlx::query(
                    "UPDATE alert_sessions SET status = ?, completed_at_us = ?, final_summary = ? \
                     WHERE session_id = ?",
                )
                .bind(status.as_str())
                .bind(completed_at_us)
                .bind(final_summary)
                .bind(session_id)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    pub async fn set_current_stage_index(&self, session_id: &str, stage_index: i64) -> Result<(), sqlx::Error> {
        self.retry
            .run("set_current_stage_index", || async {
                sqlx::query("UPDATE alert_sessions SET current_stage_index = ? WHERE session_id = ?")
                    .bind(stage_index)
                    .bind(session_id)
                    .execute(&self.pool)
                    .await
            })
            .await?;
        Ok(())
    }

    /// Reclaim sessions whose owning pod is not in `live_pod_ids` back to
    /// `pending`, so another pod can claim them. Used by the stale-session
    /// reaper, never by graceful shutdown of the owning pod itself.
    pub async fn reclaim_orphaned_sessions(&self, live_pod_ids: &[String]) -> Result<u64, sqlx::Error> {
        let in_progress = self
            .retry
            .run("list_in_progress_sessions", || async {
                sqlx::query("SELECT * FROM alert_sessions WHERE status = 'in_progress'")
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;

        let mut reclaimed = 0u64;
        for row in in_progress {
            let session = row_to_session(&row);
            let owned_by_live_pod = session
                .pod_id
                .as_deref()
                .map(|pod| live_pod_ids.iter().any(|p| p == pod))
                .unwrap_or(false);
            if owned_by_live_pod {
                continue;
            }
            self.retry
                .run("reclaim_session", || async {
                    sqlx::query(
                        "UPDATE alert_sessions SET status = 'pending', pod_id = NULL, started_at_us = NULL \
                         WHERE session_id = ? AND status = 'in_progress'",
                    )
                    .bind(&session.session_id)
                    .execute(&self.pool)
                    .await
                })
                .await?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    pub async fn create_stage_execution(
        &self,
        stage_execution_id: &str,
        session_id: &str,
        stage_index: i64,
        agent_id: &str,
        is_parallel_stage: bool,
        started_at_us: i64,
    ) -> Result<(), sqlx::Error> {
        self.retry
            .run("create_stage_execution", || async {
                sqlx::query(
                    "INSERT INTO stage_executions \
                     (stage_execution_id, session_id, stage_index, agent_id, status, is_parallel_stage, started_at_us) \
                     VALUES (?, ?, ?, ?, 'in_progress', ?, ?)",
                )
                .bind(stage_execution_id)
                .bind(session_id)
                .bind(stage_index)
                .bind(agent_id)
                .bind(is_parallel_stage)
                .bind(started_at_us)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    pub async fn update_stage_execution(
        &self,
        stage_execution_id: &str,
        status: &str,
        completed_at_us: i64,
        output: Option<&Value>,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let output_text = output.map(|v| serde_json::to_string(v).unwrap_or_default());
        self.retry
            .run("update_stage_execution", || async {
                sqlx::query(
                    "UPDATE stage_executions SET status = ?, completed_at_us = ?, output = ?, error_message = ? \
                     WHERE stage_execution_id = ?",
                )
                .bind(status)
                .bind(completed_at_us)
                .bind(&output_text)
                .bind(error_message)
                .bind(stage_execution_id)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    /// Persists the iteration controller's progress so a paused stage can
    /// resume its ReAct loop and conversation instead of starting over.
    pub async fn update_stage_execution_progress(
        &self,
        stage_execution_id: &str,
        current_iteration: i64,
        conversation_state: &Value,
    ) -> Result<(), sqlx::Error> {
        let conversation_text = serde_json::to_string(conversation_state).unwrap_or_default();
        self.retry
            .run("update_stage_execution_progress", || async {
                sqlx::query(
                    "UPDATE stage_executions SET current_iteration = ?, conversation_state = ? \
                     WHERE stage_execution_id = ?",
                )
                .bind(current_iteration)
                .bind(&conversation_text)
                .bind(stage_execution_id)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    /// All stage execution rows for a session (parent and child rows for
    /// parallel stages included), used to rehydrate a resumed chain's
    /// `ChainContext` and to reload a paused single-agent stage's conversation.
    pub async fn list_stage_executions(&self, session_id: &str) -> Result<Vec<StageExecution>, sqlx::Error> {
        let rows = self
            .retry
            .run("list_stage_executions", || async {
                sqlx::query("SELECT * FROM stage_executions WHERE session_id = ? ORDER BY stage_index ASC")
                    .bind(session_id)
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;
        Ok(rows.iter().map(row_to_stage_execution).collect())
    }

    pub async fn store_llm_interaction(&self, interaction: &LlmInteraction) -> Result<(), sqlx::Error> {
        let request_text = serde_json::to_string(&interaction.request_messages).unwrap_or_default();
        let tool_calls_text = interaction
            .tool_calls
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());
        self.retry
            .run("store_llm_interaction", || async {
                sqlx::query(
                    "INSERT INTO llm_interactions \
                     (interaction_id, session_id, stage_execution_id, iteration, provider, model, \
                      request_messages, response_text, tool_calls, prompt_tokens, completion_tokens, \
                      created_at_us, duration_ms, error_message) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&interaction.interaction_id)
                .bind(&interaction.session_id)
                .bind(&interaction.stage_execution_id)
                .bind(interaction.iteration)
                .bind(&interaction.provider)
                .bind(&interaction.model)
                .bind(&request_text)
                .bind(&interaction.response_text)
                .bind(&tool_calls_text)
                .bind(interaction.prompt_tokens)
                .bind(interaction.completion_tokens)
                .bind(interaction.created_at_us)
                .bind(interaction.duration_ms)
                .bind(&interaction.error_message)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    pub async fn store_mcp_interaction(&self, interaction: &McpInteraction) -> Result<(), sqlx::Error> {
        let arguments_text = serde_json::to_string(&interaction.arguments).unwrap_or_default();
        self.retry
            .run("store_mcp_interaction", || async {
                sqlx::query(
                    "INSERT INTO mcp_interactions \
                     (interaction_id, session_id, stage_execution_id, iteration, server_id, tool_name, \
                      arguments, result_text, is_error, created_at_us, duration_ms) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&interaction.interaction_id)
                .bind(&interaction.session_id)
                .bind(&interaction.stage_execution_id)
                .bind(interaction.iteration)
                .bind(&interaction.server_id)
                .bind(&interaction.tool_name)
                .bind(&arguments_text)
                .bind(&interaction.result_text)
                .bind(interaction.is_error)
                .bind(interaction.created_at_us)
                .bind(interaction.duration_ms)
                .execute(&self.pool)
                .await
            })
            .await?;
        Ok(())
    }

    /// Retention cleanup: deleting the session cascades to its stage/LLM/MCP
    /// interaction rows via `ON DELETE CASCADE`.
    pub async fn delete_sessions_older_than(&self, cutoff_us: i64) -> Result<u64, sqlx::Error> {
        let result = self
            .retry
            .run("delete_sessions_older_than", || async {
                sqlx::query(
                    "DELETE FROM alert_sessions WHERE created_at_us < ? AND status IN ('completed', 'failed', 'cancelled')",
                )
                    .bind(cutoff_us)
                    .execute(&self.pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

fn row_to_session(row: &AnyRow) -> AlertSession {
    let payload_text: String = row.try_get("alert_payload").unwrap_or_default();
    AlertSession {
        session_id: row.try_get("session_id").unwrap_or_default(),
        alert_key: row.try_get("alert_key").unwrap_or_default(),
        chain_id: row.try_get("chain_id").unwrap_or_default(),
        status: row.try_get("status").unwrap_or_default(),
        pod_id: row.try_get("pod_id").ok(),
        current_stage_index: row.try_get("current_stage_index").unwrap_or_default(),
        created_at_us: row.try_get("created_at_us").unwrap_or_default(),
        started_at_us: row.try_get("started_at_us").ok(),
        completed_at_us: row.try_get("completed_at_us").ok(),
        alert_payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
        final_summary: row.try_get("final_summary").ok(),
    }
}

fn row_to_stage_execution(row: &AnyRow) -> StageExecution {
    let output_text: Option<String> = row.try_get("output").ok();
    let conversation_text: Option<String> = row.try_get("conversation_state").ok();
    StageExecution {
        stage_execution_id: row.try_get("stage_execution_id").unwrap_or_default(),
        session_id: row.try_get("session_id").unwrap_or_default(),
        stage_index: row.try_get("stage_index").unwrap_or_default(),
        agent_id: row.try_get("agent_id").unwrap_or_default(),
        status: row.try_get("status").unwrap_or_default(),
        is_parallel_stage: row.try_get("is_parallel_stage").unwrap_or_default(),
        started_at_us: row.try_get("started_at_us").ok(),
        completed_at_us: row.try_get("completed_at_us").ok(),
        output: output_text.and_then(|t| serde_json::from_str(&t).ok()),
        error_message: row.try_get("error_message").ok(),
        current_iteration: row.try_get("current_iteration").unwrap_or_default(),
        conversation_state: conversation_text.and_then(|t| serde_json::from_str(&t).ok()),
    }
}

impl StageExecution {
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at_us, self.completed_at_us) {
            (Some(start), Some(end)) => Some((end - start) / 1000),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> InteractionStore {
        InteractionStore::connect("sqlite::memory:", RetryPolicy::default())
            .await
            .expect("in-memory sqlite store should connect")
    }

    #[tokio::test]
    async fn create_then_claim_session() {
        let store = test_store().await;
        store
            .create_session("s1", "alert-key-1", "chain-1", 1_000, &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        assert_eq!(store.count_sessions_by_status(SessionStatus::Pending).await.unwrap(), 1);

        let claimed = store.claim_next_pending_session("pod-a", 2_000).await.unwrap();
        let claimed = claimed.expect("a pending session should be claimable");
        assert_eq!(claimed.session_id, "s1");
        assert_eq!(claimed.pod_id.as_deref(), Some("pod-a"));

        assert_eq!(store.count_sessions_by_status(SessionStatus::Pending).await.unwrap(), 0);
        assert_eq!(store.count_sessions_by_status(SessionStatus::InProgress).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_empty() {
        let store = test_store().await;
        assert!(store.claim_next_pending_session("pod-a", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaim_returns_orphaned_sessions_to_pending() {
        let store = test_store().await;
        store
            .create_session("s1", "alert-key-1", "chain-1", 1_000, &serde_json::json!({}))
            .await
            .unwrap();
        store.claim_next_pending_session("dead-pod", 2_000).await.unwrap();

        let reclaimed = store.reclaim_orphaned_sessions(&["live-pod".to_string()]).await.unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(store.count_sessions_by_status(SessionStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cascade_delete_removes_child_rows() {
        let store = test_store().await;
        store
            .create_session("s1", "alert-key-1", "chain-1", 1_000, &serde_json::json!({}))
            .await
            .unwrap();
        store
            .create_stage_execution("se1", "s1", 0, "agent-a", false, 1_500)
            .await
            .unwrap();
        store
            .update_session_status("s1", SessionStatus::Completed, Some(3_000), Some("ok"))
            .await
            .unwrap();

        let deleted = store.delete_sessions_older_than(i64::MAX).await.unwrap();
        assert_eq!(deleted, 1);

        let row = sqlx::query("SELECT COUNT(*) AS c FROM stage_executions WHERE session_id = 's1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let count: i64 = row.try_get("c").unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn stage_execution_progress_persists_iteration_and_conversation() {
        let store = test_store().await;
        store
            .create_session("s1", "alert-key-1", "chain-1", 1_000, &serde_json::json!({}))
            .await
            .unwrap();
        store
            .create_stage_execution("se1", "s1", 0, "agent-a", false, 1_500)
            .await
            .unwrap();

        let conversation = serde_json::json!([{"role": {"kind": "user"}, "content": "hi", "tool_calls": []}]);
        store
            .update_stage_execution_progress("se1", 2, &conversation)
            .await
            .unwrap();

        let rows = store.list_stage_executions("s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current_iteration, 2);
        assert_eq!(rows[0].conversation_state.as_ref(), Some(&conversation));
    }

    #[tokio::test]
    async fn list_stage_executions_orders_by_stage_index() {
        let store = test_store().await;
        store
            .create_session("s1", "alert-key-1", "chain-1", 1_000, &serde_json::json!({}))
            .await
            .unwrap();
        store.create_stage_execution("se2", "s1", 1, "agent-b", false, 1_500).await.unwrap();
        store.create_stage_execution("se1", "s1", 0, "agent-a", false, 1_400).await.unwrap();

        let rows = store.list_stage_executions("s1").await.unwrap();
        assert_eq!(rows.iter().map(|r| r.stage_index).collect::<Vec<_>>(), vec![0, 1]);
    }
}
