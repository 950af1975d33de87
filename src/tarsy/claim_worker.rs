//! C11 Claim Worker: the per-process singleton that dequeues pending
//! sessions, respects a global active-session cap, and dispatches each
//! claimed session to the chain executor in a background task.
//!
//! The sleep-then-select loop shape follows the `mcp` crate's health
//! monitor: sleep first so a freshly-started pod doesn't immediately
//! hammer the queue, select against a shutdown notification so `stop()` is
//! cooperative rather than abrupt.

use crate::chain_context::ChainContext;
use crate::chain_executor::ChainExecutor;
use crate::chain_registry::ChainRegistry;
use crate::config::ClaimWorkerConfig;
use crate::iteration_controller::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use store::models::SessionStatus;
use store::InteractionStore;
use tokio::sync::Notify;

pub struct ClaimWorker {
    store: Arc<InteractionStore>,
    chains: Arc<ChainRegistry>,
    executor: Arc<ChainExecutor>,
    config: ClaimWorkerConfig,
    shutdown: Arc<Notify>,
}

impl ClaimWorker {
    pub fn new(
        store: Arc<InteractionStore>,
        chains: Arc<ChainRegistry>,
        executor: Arc<ChainExecutor>,
        config: ClaimWorkerConfig,
    ) -> Self {
        Self {
            store,
            chains,
            executor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.config.pod_id
    }

    /// Cooperative shutdown: flips the flag the loop selects against. The
    /// caller is responsible for awaiting the loop's `JoinHandle` with its
    /// own grace period and cancelling it if exceeded; in-flight stage
    /// executions are never force-interrupted here.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.shutdown.notified() => {
                    if log::log_enabled!(log::Level::Info) {
                        log::info!("claim worker '{}' stopping", self.config.pod_id);
                    }
                    return;
                }
            }

            if let Err(e) = self.tick().await {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("claim worker tick failed: {e}");
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), sqlx::Error> {
        let in_progress = self.store.count_sessions_by_status(SessionStatus::InProgress).await?;
        if in_progress as usize >= self.config.max_concurrent_sessions {
            return Ok(());
        }

        let now_us = now_us();
        let claimed = match self.store.claim_next_pending_session(&self.config.pod_id, now_us).await? {
            Some(session) => session,
            None => return Ok(()),
        };

        let chain = match self.chains.get_chain(&claimed.chain_id) {
            Some(chain) => chain.clone(),
            None => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!(
                        "claimed session '{}' references unknown chain '{}', marking failed",
                        claimed.session_id,
                        claimed.chain_id
                    );
                }
                self.store
                    .update_session_status(
                        &claimed.session_id,
                        SessionStatus::Failed,
                        Some(now_us),
                        Some("unknown chain id"),
                    )
                    .await?;
                return Ok(());
            }
        };

        let store = self.store.clone();
        let executor = self.executor.clone();
        let session_id = claimed.session_id.clone();
        let starting_stage_index = claimed.current_stage_index as usize;

        tokio::spawn(async move {
            // Starts with an empty stage_outputs map even on resume: the
            // executor rehydrates completed stages from the store itself
            // before running anything, keyed off `starting_stage_index`.
            let mut context = ChainContext::new(session_id.clone(), claimed.alert_payload.clone());
            let cancellation = CancellationToken::new();

            if let Err(e) = executor.run(&chain, &mut context, starting_stage_index, None, &cancellation).await {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("chain execution for session '{session_id}' failed to dispatch: {e}");
                }
                let _ = store
                    .update_session_status(&session_id, SessionStatus::Failed, Some(now_us), Some(&e.to_string()))
                    .await;
            }
        });

        Ok(())
    }
}

/// Background reaper: periodically returns sessions owned by dead pods to
/// `pending` so another pod can claim them. Run as its own spawned task,
/// independent of any particular `ClaimWorker`'s loop.
pub async fn run_stale_session_reaper(
    store: Arc<InteractionStore>,
    live_pod_ids: impl Fn() -> Vec<String> + Send + Sync + 'static,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => return,
        }

        let live = live_pod_ids();
        match store.reclaim_orphaned_sessions(&live).await {
            Ok(count) if count > 0 => {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("reclaimed {count} orphaned sessions back to pending");
                }
            }
            Ok(_) => {}
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("stale session reaper failed: {e}");
                }
            }
        }
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
