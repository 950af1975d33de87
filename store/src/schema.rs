//! Schema definitions for both supported backends.
//!
//! No migration framework is used (out of scope); `init_schema` issues
//! `CREATE TABLE IF NOT EXISTS` statements directly, which is sufficient for
//! this crate's own tests and for a caller to invoke once at startup.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            BackendKind::Postgres
        } else {
            BackendKind::Sqlite
        }
    }
}

/// DDL for `alert_sessions`, `stage_executions`, `llm_interactions`,
/// `mcp_interactions`, `events`, and `event_channel_sequences`. Stage/LLM/MCP
/// interaction tables cascade on session delete so retention cleanup is a
/// single `DELETE FROM alert_sessions`. `event_channel_sequences` tracks the
/// next id per channel independently of the `events` rows themselves, so
/// pruning old events can never roll the sequence backward.
///
/// `oauth_states` and `session_scores` are deliberately not modeled here —
/// they belong to a collaborating subsystem this crate does not implement.
pub fn ddl_statements(backend: BackendKind) -> Vec<&'static str> {
    match backend {
        BackendKind::Postgres => vec![
            r#"CREATE TABLE IF NOT EXISTS alert_sessions (
                session_id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                chain_id TEXT NOT NULL,
                status TEXT NOT NULL,
                pod_id TEXT,
                current_stage_index BIGINT NOT NULL DEFAULT 0,
                created_at_us BIGINT NOT NULL,
                started_at_us BIGINT,
                completed_at_us BIGINT,
                alert_payload JSONB NOT NULL,
                final_summary TEXT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alert_sessions_status ON alert_sessions (status)"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alert_sessions_alert_key ON alert_sessions (alert_key)"#,
            r#"CREATE TABLE IF NOT EXISTS stage_executions (
                stage_execution_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_index BIGINT NOT NULL,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_parallel_stage BOOLEAN NOT NULL DEFAULT FALSE,
                started_at_us BIGINT,
                completed_at_us BIGINT,
                output JSONB,
                error_message TEXT,
                current_iteration BIGINT NOT NULL DEFAULT 0,
                conversation_state JSONB
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_stage_executions_session ON stage_executions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS llm_interactions (
                interaction_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_execution_id TEXT NOT NULL REFERENCES stage_executions(stage_execution_id) ON DELETE CASCADE,
                iteration BIGINT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                request_messages JSONB NOT NULL,
                response_text TEXT,
                tool_calls JSONB,
                prompt_tokens BIGINT,
                completion_tokens BIGINT,
                created_at_us BIGINT NOT NULL,
                duration_ms BIGINT,
                error_message TEXT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_llm_interactions_session ON llm_interactions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS mcp_interactions (
                interaction_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_execution_id TEXT NOT NULL REFERENCES stage_executions(stage_execution_id) ON DELETE CASCADE,
                iteration BIGINT NOT NULL,
                server_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments JSONB NOT NULL,
                result_text TEXT,
                is_error BOOLEAN NOT NULL DEFAULT FALSE,
                created_at_us BIGINT NOT NULL,
                duration_ms BIGINT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_mcp_interactions_session ON mcp_interactions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS events (
                channel TEXT NOT NULL,
                event_id BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at_us BIGINT NOT NULL,
                PRIMARY KEY (channel, event_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS event_channel_sequences (
                channel TEXT PRIMARY KEY,
                next_event_id BIGINT NOT NULL
            )"#,
        ],
        BackendKind::Sqlite => vec![
            r#"CREATE TABLE IF NOT EXISTS alert_sessions (
                session_id TEXT PRIMARY KEY,
                alert_key TEXT NOT NULL,
                chain_id TEXT NOT NULL,
                status TEXT NOT NULL,
                pod_id TEXT,
                current_stage_index INTEGER NOT NULL DEFAULT 0,
                created_at_us INTEGER NOT NULL,
                started_at_us INTEGER,
                completed_at_us INTEGER,
                alert_payload TEXT NOT NULL,
                final_summary TEXT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alert_sessions_status ON alert_sessions (status)"#,
            r#"CREATE INDEX IF NOT EXISTS idx_alert_sessions_alert_key ON alert_sessions (alert_key)"#,
            r#"CREATE TABLE IF NOT EXISTS stage_executions (
                stage_execution_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_index INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_parallel_stage INTEGER NOT NULL DEFAULT 0,
                started_at_us INTEGER,
                completed_at_us INTEGER,
                output TEXT,
                error_message TEXT,
                current_iteration INTEGER NOT NULL DEFAULT 0,
                conversation_state TEXT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_stage_executions_session ON stage_executions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS llm_interactions (
                interaction_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_execution_id TEXT NOT NULL REFERENCES stage_executions(stage_execution_id) ON DELETE CASCADE,
                iteration INTEGER NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                request_messages TEXT NOT NULL,
                response_text TEXT,
                tool_calls TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                created_at_us INTEGER NOT NULL,
                duration_ms INTEGER,
                error_message TEXT
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_llm_interactions_session ON llm_interactions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS mcp_interactions (
                interaction_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES alert_sessions(session_id) ON DELETE CASCADE,
                stage_execution_id TEXT NOT NULL REFERENCES stage_executions(stage_execution_id) ON DELETE CASCADE,
                iteration INTEGER NOT NULL,
                server_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT NOT NULL,
                result_text TEXT,
                is_error INTEGER NOT NULL DEFAULT 0,
                created_at_us INTEGER NOT NULL,
                duration_ms INTEGER
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_mcp_interactions_session ON mcp_interactions (session_id)"#,
            r#"CREATE TABLE IF NOT EXISTS events (
                channel TEXT NOT NULL,
                event_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at_us INTEGER NOT NULL,
                PRIMARY KEY (channel, event_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS event_channel_sequences (
                channel TEXT PRIMARY KEY,
                next_event_id INTEGER NOT NULL
            )"#,
            r#"PRAGMA foreign_keys = ON"#,
        ],
    }
}
