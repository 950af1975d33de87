//! Dependency-inverted warning reporting.
//!
//! This crate never depends on the root crate's warnings registry directly
//! (that would create a cycle, since the root crate depends on this one for
//! tool calling). Instead the health-monitor loop reports through a
//! `WarningSink` trait object supplied by the caller.

use async_trait::async_trait;

/// A coarse category the root crate's warnings surface groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCategory {
    McpServerUnavailable,
}

#[async_trait]
pub trait WarningSink: Send + Sync {
    /// Ensure a warning exists for `(category, key)` with the given message.
    /// Idempotent: calling this repeatedly for the same key only refreshes
    /// the last-seen timestamp, it never duplicates entries.
    async fn ensure_warning(&self, category: WarningCategory, key: &str, message: String);

    /// Clear a previously-raised warning for `(category, key)`, if any.
    async fn clear_warning(&self, category: WarningCategory, key: &str);
}

/// A sink that drops everything, for tests and standalone use of this crate.
pub struct NullWarningSink;

#[async_trait]
impl WarningSink for NullWarningSink {
    async fn ensure_warning(&self, _category: WarningCategory, _key: &str, _message: String) {}
    async fn clear_warning(&self, _category: WarningCategory, _key: &str) {}
}
