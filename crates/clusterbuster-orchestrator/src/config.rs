use clusterbuster_core::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level orchestrator configuration. Every section is optional in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl OrchestratorConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(raw: &str) -> ClusterResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| ClusterError::Config(format!("Invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the orchestrator.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.dispatch.max_concurrent_dispatches == 0 {
            return Err(ClusterError::Config(
                "dispatch.max_concurrent_dispatches must be at least 1".into(),
            ));
        }
        if self.dispatch.dispatch_interval_ms == 0 || self.health.sweep_interval_ms == 0 {
            return Err(ClusterError::Config(
                "dispatch_interval_ms and sweep_interval_ms must be greater than 0".into(),
            ));
        }
        if self.health.check_timeout_ms == 0 {
            return Err(ClusterError::Config(
                "health.check_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(ClusterError::Config(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Queue draining and agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Entries of one drain allowed in flight at once. `1` is strictly sequential.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,
    /// Stop a drain at the first `NoAvailableAgent` and put the remaining
    /// entries back on the queue instead of attempting them.
    #[serde(default)]
    pub abort_on_no_agent: bool,
    /// Deadline for a single `execute` call. `None` waits indefinitely.
    #[serde(default)]
    pub execute_timeout_ms: Option<u64>,
    /// Supervisor period between dispatch cycles.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,
}

impl DispatchConfig {
    pub fn execute_timeout(&self) -> Option<Duration> {
        self.execute_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: default_max_concurrent(),
            abort_on_no_agent: false,
            execute_timeout_ms: None,
            dispatch_interval_ms: default_dispatch_interval(),
        }
    }
}

/// Health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// A health check that takes longer than this counts as unhealthy.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
    /// Supervisor period between health sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl HealthConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: default_check_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

/// Bounds on reassignment after an agent failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of reassignments a single task may go through.
    #[serde(default = "default_max_reassignments")]
    pub max_reassignments: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// Backoff before the reassignment that follows `retries` earlier ones.
    pub fn backoff(&self, retries: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, retries))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_reassignments: default_max_reassignments(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

/// Exponential backoff capped at `backoff_max_ms`.
pub(crate) fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

fn default_max_concurrent() -> usize {
    1
}
fn default_dispatch_interval() -> u64 {
    1_000
}
fn default_check_timeout() -> u64 {
    5_000
}
fn default_sweep_interval() -> u64 {
    30_000
}
fn default_max_reassignments() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    30_000
}
