//! Server registry: static configuration for every configured MCP server.
//!
//! Keyed by server id, as described in §4.4 of the core specification.
//! `McpServerRegistry` itself is immutable after construction; the client
//! layers session state on top of it.

use regex::Regex;
use std::collections::HashMap;

/// How a server is reached.
#[derive(Debug, Clone)]
pub enum TransportKind {
    /// Spawn a subprocess; JSON-RPC is framed over its stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// POST JSON-RPC bodies to an HTTP endpoint.
    StreamableHttp {
        url: String,
        bearer_token: Option<String>,
        /// When `false`, TLS certificate verification is disabled for this server.
        /// Only ever set for local/dev servers — never flip this for a production target.
        verify_tls: bool,
    },
}

/// A single substring/regex masking rule applied to MCP tool-call results before
/// the history and event hooks observe the payload (§4.4).
#[derive(Debug, Clone)]
pub struct MaskingRule {
    pub pattern: Regex,
    pub replacement: String,
}

/// Static configuration for one MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_id: String,
    pub enabled: bool,
    pub transport: TransportKind,
    pub masking_rules: Vec<MaskingRule>,
    pub instructions: Option<String>,
    /// Per-call deadline; defaults to 120s per §5 Timeouts.
    pub tool_call_timeout_secs: u64,
}

impl McpServerConfig {
    pub fn new(server_id: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            server_id: server_id.into(),
            enabled: true,
            transport,
            masking_rules: Vec::new(),
            instructions: None,
            tool_call_timeout_secs: 120,
        }
    }

    pub fn with_masking_rule(mut self, pattern: Regex, replacement: impl Into<String>) -> Self {
        self.masking_rules.push(MaskingRule {
            pattern,
            replacement: replacement.into(),
        });
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Apply all masking rules in order, rewriting matched substrings.
    pub fn apply_masking(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for rule in &self.masking_rules {
            masked = rule.pattern.replace_all(&masked, rule.replacement.as_str()).into_owned();
        }
        masked
    }
}

/// Registry of all configured MCP servers, keyed by server id.
#[derive(Debug, Clone, Default)]
pub struct McpServerRegistry {
    servers: HashMap<String, McpServerConfig>,
}

impl McpServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: McpServerConfig) {
        self.servers.insert(config.server_id.clone(), config);
    }

    pub fn get(&self, server_id: &str) -> Option<&McpServerConfig> {
        self.servers.get(server_id)
    }

    pub fn get_all_server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn enabled_server_ids(&self) -> Vec<String> {
        self.servers
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.server_id.clone())
            .collect()
    }

    /// Resolve a provider-prefixed tool name (`"{server}_{tool}"` or
    /// `"{server}.{tool}"`) back to `(server_id, tool_name)`, preferring the
    /// longest matching server id so ids containing `_` resolve unambiguously.
    pub fn resolve_prefixed_tool_name<'a>(&self, prefixed: &'a str) -> Option<(String, String)> {
        let mut best: Option<(String, String)> = None;
        for server_id in self.servers.keys() {
            for sep in ['_', '.'] {
                let prefix = format!("{server_id}{sep}");
                if let Some(rest) = prefixed.strip_prefix(&prefix) {
                    if best
                        .as_ref()
                        .map(|(sid, _)| sid.len() < server_id.len())
                        .unwrap_or(true)
                    {
                        best = Some((server_id.clone(), rest.to_string()));
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_config(id: &str) -> McpServerConfig {
        McpServerConfig::new(
            id,
            TransportKind::StreamableHttp {
                url: "http://localhost:9000".into(),
                bearer_token: None,
                verify_tls: true,
            },
        )
    }

    #[test]
    fn resolves_underscore_and_dot_conventions() {
        let mut reg = McpServerRegistry::new();
        reg.register(http_config("kubernetes"));

        assert_eq!(
            reg.resolve_prefixed_tool_name("kubernetes_get_pods"),
            Some(("kubernetes".to_string(), "get_pods".to_string()))
        );
        assert_eq!(
            reg.resolve_prefixed_tool_name("kubernetes.get_pods"),
            Some(("kubernetes".to_string(), "get_pods".to_string()))
        );
    }

    #[test]
    fn prefers_longest_server_id_on_ambiguity() {
        let mut reg = McpServerRegistry::new();
        reg.register(http_config("kube"));
        reg.register(http_config("kube_prod"));

        assert_eq!(
            reg.resolve_prefixed_tool_name("kube_prod_list_nodes"),
            Some(("kube_prod".to_string(), "list_nodes".to_string()))
        );
    }

    #[test]
    fn masking_rule_rewrites_matches() {
        let config = http_config("secrets").with_masking_rule(
            Regex::new(r"sk-[a-zA-Z0-9]+").unwrap(),
            "[REDACTED]",
        );
        let masked = config.apply_masking("token is sk-abc123 now");
        assert_eq!(masked, "token is [REDACTED] now");
    }
}
