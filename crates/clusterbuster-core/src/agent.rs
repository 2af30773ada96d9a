//! The agent capability boundary.
//!
//! Concrete agents (model clients, search backends, ...) live outside this
//! workspace. The orchestrator only sees them through [`Agent`], selecting
//! among implementations polymorphically.

use crate::{ClusterResult, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// An addressable worker that executes tasks of one type.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique identity within a registry.
    fn id(&self) -> &str;

    /// Capability category, matched by equality against [`Task::task_type`].
    fn agent_type(&self) -> &str;

    /// Work the agent currently reports as in flight.
    fn current_load(&self) -> u32;

    /// Agent-determined availability. Unavailable agents are never selected.
    fn is_available(&self) -> bool;

    /// Run the task. `cancellation` fires when the job is cancelled or taken
    /// over by recovery; agents should stop promptly when it does.
    async fn execute(
        &self,
        task: &Task,
        cancellation: CancellationToken,
    ) -> ClusterResult<serde_json::Value>;

    /// Report liveness. Either an error or `healthy == false` marks the agent failed.
    async fn check_health(&self) -> ClusterResult<HealthReport>;
}
