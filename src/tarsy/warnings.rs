//! C13 Warnings & Health Surfacing.
//!
//! A single in-memory registry of active operational warnings (MCP server
//! unreachability today; future categories plug into the same
//! ensure/clear contract). Implements the `mcp` crate's `WarningSink` so the
//! health monitor loop can report into this registry without that crate
//! depending on the root crate.

use async_trait::async_trait;
use mcp::{WarningCategory as McpWarningCategory, WarningSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCategory {
    McpServerUnavailable,
}

impl From<McpWarningCategory> for WarningCategory {
    fn from(c: McpWarningCategory) -> Self {
        match c {
            McpWarningCategory::McpServerUnavailable => WarningCategory::McpServerUnavailable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub category: WarningCategory,
    pub key: String,
    pub message: String,
    pub first_seen_at_us: i64,
    pub last_seen_at_us: i64,
}

#[derive(Default)]
struct WarningsInner {
    warnings: HashMap<(WarningCategory, String), Warning>,
}

/// Clonable handle; all instances share the same underlying registry.
#[derive(Clone, Default)]
pub struct WarningsRegistry {
    inner: Arc<RwLock<WarningsInner>>,
}

impl WarningsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure(&self, category: WarningCategory, key: &str, message: String, now_us: i64) {
        let mut inner = self.inner.write().await;
        let entry = inner
            .warnings
            .entry((category, key.to_string()))
            .or_insert_with(|| Warning {
                category,
                key: key.to_string(),
                message: message.clone(),
                first_seen_at_us: now_us,
                last_seen_at_us: now_us,
            });
        entry.message = message;
        entry.last_seen_at_us = now_us;
    }

    pub async fn clear(&self, category: WarningCategory, key: &str) {
        self.inner.write().await.warnings.remove(&(category, key.to_string()));
    }

    pub async fn active(&self) -> Vec<Warning> {
        self.inner.read().await.warnings.values().cloned().collect()
    }

    pub async fn is_healthy(&self) -> bool {
        self.inner.read().await.warnings.is_empty()
    }
}

/// Adapter handed to the `mcp` crate's `McpClient`/health monitor; timestamps
/// real wall-clock time since the mcp crate has no notion of the core's
/// session-relative clock.
pub struct McpWarningSinkAdapter {
    registry: WarningsRegistry,
}

impl McpWarningSinkAdapter {
    pub fn new(registry: WarningsRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl WarningSink for McpWarningSinkAdapter {
    async fn ensure_warning(&self, category: McpWarningCategory, key: &str, message: String) {
        let now_us = now_us();
        self.registry.ensure(category.into(), key, message, now_us).await;
    }

    async fn clear_warning(&self, category: McpWarningCategory, key: &str) {
        self.registry.clear(category.into(), key).await;
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

    #[tokio::test]
    async fn ensure_is_idempotent_and_clear_removes() {
        let registry = WarningsRegistry::new();
        registry
            .ensure(WarningCategory::McpServerUnavailable, "kubernetes", "down".into(), 1)
            .await;
        registry
            .ensure(WarningCategory::McpServerUnavailable, "kubernetes", "still down".into(), 2)
            .await;

        let active = registry.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "still down");
        assert_eq!(active[0].first_seen_at_us, 1);
        assert_eq!(active[0].last_seen_at_us, 2);

        registry.clear(WarningCategory::McpServerUnavailable, "kubernetes").await;
        assert!(registry.is_healthy().await);
    }
}
