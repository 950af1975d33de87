//! MCP client runtime.
//!
//! Owns the server registry, stdio/streamable-HTTP transports, per-server
//! sessions, masking, retry-on-transient-failure recovery, and the background
//! health monitor. Exposes a `WarningSink` trait so callers can route
//! reachability problems into their own warnings surface without this crate
//! depending on it.

pub mod client;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod warnings;

pub use client::{McpClient, McpClientError, ToolCallResult};
pub use protocol::McpToolDescriptor;
pub use registry::{MaskingRule, McpServerConfig, McpServerRegistry, TransportKind};
pub use warnings::{NullWarningSink, WarningCategory, WarningSink};
