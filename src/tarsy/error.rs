//! Core error taxonomy. Every fallible operation in this crate returns a
//! `TarsyError` (or a `Result<_, Box<dyn Error + Send + Sync>>` at the LLM/MCP
//! boundary, wrapped into one at the call site) so the claim worker and chain
//! executor can make a single retryable/non-retryable decision regardless of
//! which component raised it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote peer (LLM provider or MCP server) is unreachable or timed
    /// out; safe to retry.
    Transient,
    /// The remote peer responded with a well-formed error; retrying without
    /// changing the request would fail identically.
    Semantic,
    /// A local precondition was violated (bad config, missing agent,
    /// malformed chain) — a bug, not a transient condition.
    Internal,
    /// The database rejected or could not complete an operation after its
    /// own retry policy was exhausted.
    Storage,
}

#[derive(Debug)]
pub struct TarsyError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TarsyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }
}

impl fmt::Display for TarsyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TarsyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<sqlx::Error> for TarsyError {
    fn from(e: sqlx::Error) -> Self {
        TarsyError::with_source(ErrorKind::Storage, e.to_string(), Box::new(e))
    }
}

impl From<mcp::McpClientError> for TarsyError {
    fn from(e: mcp::McpClientError) -> Self {
        let kind = if e.is_retryable() {
            ErrorKind::Transient
        } else {
            ErrorKind::Semantic
        };
        TarsyError::new(kind, e.to_string())
    }
}
