//! Runtime configuration. Plain structs with `Default` impls and `with_*`
//! builder methods, matching the teacher crate's configuration style — no
//! TOML/YAML loading is introduced here (out of scope); a caller assembles
//! this from whatever config source it already uses.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClaimWorkerConfig {
    /// Identity this process claims sessions under; also the liveness key
    /// the stale-session reaper checks against.
    pub pod_id: String,
    /// Upper bound on sessions this pod processes concurrently.
    pub max_concurrent_sessions: usize,
    /// How long an empty queue is slept before polling again.
    pub poll_interval: Duration,
    /// A session whose owner hasn't refreshed its lease within this window
    /// is eligible for reclaim by another pod.
    pub lease_horizon: Duration,
}

impl Default for ClaimWorkerConfig {
    fn default() -> Self {
        Self {
            pod_id: uuid::Uuid::new_v4().to_string(),
            max_concurrent_sessions: 10,
            poll_interval: Duration::from_secs(2),
            lease_horizon: Duration::from_secs(300),
        }
    }
}

impl ClaimWorkerConfig {
    pub fn with_pod_id(mut self, pod_id: impl Into<String>) -> Self {
        self.pod_id = pod_id.into();
        self
    }

    pub fn with_max_concurrent_sessions(mut self, n: usize) -> Self {
        self.max_concurrent_sessions = n;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HookConfig {
    /// History hook truncates any single field beyond this many bytes,
    /// replacing the remainder with `"[HOOK TRUNCATED N bytes]"`.
    pub truncation_threshold_bytes: usize,
    /// A hook whose error budget is exhausted stops being invoked for the
    /// remainder of the session rather than failing every subsequent call.
    pub max_hook_errors_per_session: u32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            truncation_threshold_bytes: 100_000,
            max_hook_errors_per_session: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationControllerConfig {
    /// Maximum ReAct iterations before a session pauses (not fails) awaiting
    /// operator intervention.
    pub max_iterations: u32,
    pub llm_timeout: Duration,
}

impl Default for IterationControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            llm_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TarsyConfig {
    pub claim_worker: ClaimWorkerConfig,
    pub hooks: HookConfig,
    pub iteration_controller: IterationControllerConfig,
    pub health_monitor: HealthMonitorConfig,
    /// Sessions older than this are eligible for retention cleanup.
    pub retention_horizon: Duration,
}

impl Default for TarsyConfig {
    fn default() -> Self {
        Self {
            claim_worker: ClaimWorkerConfig::default(),
            hooks: HookConfig::default(),
            iteration_controller: IterationControllerConfig::default(),
            health_monitor: HealthMonitorConfig::default(),
            retention_horizon: Duration::from_secs(30 * 24 * 3600),
        }
    }
}
