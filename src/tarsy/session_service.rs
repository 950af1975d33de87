//! C12 Session Lifecycle Service: the entry point for submitting alerts,
//! deduplicating concurrent identical submissions, and exposing
//! cancel/pause/resume.

use crate::error::TarsyError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::models::{AlertSession, SessionStatus};
use store::InteractionStore;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of [`SessionService::create`]: either a freshly inserted session,
/// or the id of an already in-flight session with an identical alert key.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created { session_id: String },
    Duplicate { session_id: String },
}

/// Per-session pause flags the iteration controller polls at its next check
/// point; not persisted, since a pod restart already drops any session it
/// owned back to `pending` via the stale-session reaper.
#[derive(Default)]
struct PauseFlags {
    requested: std::collections::HashSet<String>,
}

pub struct SessionService {
    store: Arc<InteractionStore>,
    pause_flags: RwLock<PauseFlags>,
}

impl SessionService {
    pub fn new(store: Arc<InteractionStore>) -> Self {
        Self {
            store,
            pause_flags: RwLock::new(PauseFlags::default()),
        }
    }

    /// Validate `alert_type`/`runbook_url`, compute the alert's dedup key,
    /// and either reuse an existing non-terminal session with the same key
    /// or insert a fresh `pending` row.
    pub async fn create(
        &self,
        alert_type: &str,
        chain_id: &str,
        alert_data: &Value,
        runbook_url: Option<&str>,
    ) -> Result<CreateOutcome, TarsyError> {
        if alert_type.trim().is_empty() {
            return Err(TarsyError::semantic("alert_type must not be empty"));
        }
        if let Some(url) = runbook_url {
            if url::Url::parse(url).is_err() {
                return Err(TarsyError::semantic(format!("runbook_url '{url}' is not a valid URL")));
            }
        }

        let alert_key = fingerprint(alert_type, alert_data);

        if let Some(existing) = self.find_non_terminal_by_key(&alert_key).await? {
            return Ok(CreateOutcome::Duplicate {
                session_id: existing.session_id,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        self.store
            .create_session(&session_id, &alert_key, chain_id, now_us(), alert_data)
            .await?;
        Ok(CreateOutcome::Created { session_id })
    }

    async fn find_non_terminal_by_key(&self, alert_key: &str) -> Result<Option<AlertSession>, TarsyError> {
        Ok(self.store.find_non_terminal_session_by_alert_key(alert_key).await?)
    }

    pub async fn cancel(&self, session_id: &str) -> Result<(), TarsyError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TarsyError::semantic(format!("no session '{session_id}'")))?;
        let status = SessionStatus::parse(&session.status).unwrap_or(SessionStatus::Failed);
        if matches!(status, SessionStatus::Pending | SessionStatus::InProgress | SessionStatus::Paused) {
            self.store
                .update_session_status(session_id, SessionStatus::Cancelled, Some(now_us()), None)
                .await?;
        }
        Ok(())
    }

    /// Marker consulted by the iteration controller at its next check point;
    /// not a hard stop, since an in-flight LLM/MCP call is allowed to run to
    /// completion before the controller notices.
    pub async fn request_pause(&self, session_id: &str) {
        self.pause_flags.write().await.requested.insert(session_id.to_string());
    }

    pub async fn is_pause_requested(&self, session_id: &str) -> bool {
        self.pause_flags.read().await.requested.contains(session_id)
    }

    pub async fn clear_pause_request(&self, session_id: &str) {
        self.pause_flags.write().await.requested.remove(session_id);
    }

    /// Only legal from `paused`; flips the session back to `pending` so the
    /// claim worker picks it up again. The chain executor rehydrates
    /// `stage_outputs` from the persisted stage executions and resumes at
    /// the paused stage's index.
    pub async fn resume(&self, session_id: &str) -> Result<(), TarsyError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TarsyError::semantic(format!("no session '{session_id}'")))?;
        if SessionStatus::parse(&session.status) != Some(SessionStatus::Paused) {
            return Err(TarsyError::semantic(format!(
                "session '{session_id}' is not paused, cannot resume"
            )));
        }
        self.clear_pause_request(session_id).await;
        self.store
            .update_session_status(session_id, SessionStatus::Pending, None, None)
            .await?;
        Ok(())
    }
}

/// Cooperative per-session cancellation flag, flipped by [`SessionService::cancel`]
/// and polled between ReAct iterations and at stage boundaries.
#[derive(Clone, Default)]
pub struct SessionCancelFlag(Arc<AtomicBool>);

impl SessionCancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stable canonical-JSON fingerprint of `(alert_type, alert_data)`: object
/// keys sorted recursively, numbers normalized through `serde_json`'s own
/// formatting, whitespace collapsed by serializing without indentation.
fn fingerprint(alert_type: &str, alert_data: &Value) -> String {
    let canonical = canonicalize(alert_data);
    let mut hasher = Sha256::new();
    hasher.update(alert_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(fingerprint("PodCrashLooping", &a), fingerprint("PodCrashLooping", &b));
    }

    #[test]
    fn fingerprint_differs_across_alert_types() {
        let data = serde_json::json!({"pod": "x"});
        assert_ne!(fingerprint("PodCrashLooping", &data), fingerprint("NodeNotReady", &data));
    }
}
