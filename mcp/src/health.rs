//! Background health monitor: periodically pings every enabled server and
//! keeps the warnings surface in sync with reachability.

use crate::client::McpClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Runs until `shutdown` is notified. Sleeps first so a freshly-started
/// process doesn't immediately hammer every server before anything else has
/// had a chance to initialize sessions organically.
pub async fn run_health_monitor(client: Arc<McpClient>, interval: Duration, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => {
                if log::log_enabled!(log::Level::Info) {
                    log::info!("mcp health monitor stopping");
                }
                return;
            }
        }

        let server_ids = client.registry().enabled_server_ids();
        let checks = server_ids.into_iter().map(|server_id| {
            let client = client.clone();
            tokio::spawn(async move { check_one(&client, &server_id).await })
        });

        for handle in checks {
            let _ = handle.await;
        }
    }
}

/// Ping once; on failure, attempt to re-establish the session (which drives a
/// fresh `initialize`) and ping again before giving up for this cycle.
async fn check_one(client: &McpClient, server_id: &str) {
    if client.ping(server_id).await.is_ok() {
        return;
    }

    if log::log_enabled!(log::Level::Warn) {
        log::warn!("mcp server '{server_id}' failed health ping, retrying after re-initialize");
    }

    // list_tools forces session re-creation as a side effect of a fresh call.
    if client.list_tools(server_id).await.is_err() {
        return;
    }
    let _ = client.ping(server_id).await;
}
