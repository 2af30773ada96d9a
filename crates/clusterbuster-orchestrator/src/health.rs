use crate::recovery::FailureRecovery;
use crate::registry::AgentRegistry;
use crate::types::SweepReport;
use clusterbuster_core::{Agent, ClusterError, ClusterResult};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodic liveness probing of every registered agent.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    recovery: Arc<FailureRecovery>,
    check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        recovery: Arc<FailureRecovery>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            recovery,
            check_timeout,
        }
    }

    /// Check every agent at once and record the results in the registry.
    /// Nothing is recovered here; see [`sweep`](Self::sweep).
    pub async fn check(&self) -> SweepReport {
        let agents = self.registry.agents();
        let results = join_all(agents.iter().map(|agent| self.check_agent(agent.as_ref()))).await;

        let mut report = SweepReport {
            checked: agents.len(),
            ..Default::default()
        };
        for (agent, result) in agents.iter().zip(results) {
            let agent_id = agent.id();
            match result {
                Ok(()) => {
                    if self.registry.is_healthy(agent_id) == Some(false) {
                        info!(agent_id = %agent_id, "Agent healthy again");
                    }
                    self.registry.set_healthy(agent_id, true);
                    report.healthy.push(agent_id.to_string());
                }
                Err(error) => {
                    warn!(agent_id = %agent_id, error = %error, "Health check failed");
                    self.registry.set_healthy(agent_id, false);
                    report.failures.push(error);
                }
            }
        }

        debug!(
            checked = report.checked,
            failed = report.failures.len(),
            "Health check finished"
        );
        report
    }

    /// Check every agent, then hand the jobs of each failed one to recovery.
    ///
    /// Every failed agent is marked unhealthy before any recovery starts, so
    /// no job is moved onto an agent that failed in the same sweep. The
    /// recovery passes run concurrently; a failed check never stops the others.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = self.check().await;
        let passes = join_all(
            report
                .failed_agents()
                .map(|agent_id| self.recovery.handle_agent_failure(agent_id)),
        )
        .await;
        report.recoveries = passes
            .into_iter()
            .filter(|pass| !pass.outcomes.is_empty())
            .collect();
        report
    }

    async fn check_agent(&self, agent: &dyn Agent) -> ClusterResult<()> {
        let agent_id = agent.id();
        let report = tokio::time::timeout(self.check_timeout, agent.check_health())
            .await
            .map_err(|_| {
                ClusterError::health(
                    agent_id,
                    format!("health check timed out after {}ms", self.check_timeout.as_millis()),
                )
            })?
            .map_err(|e| match e {
                ClusterError::HealthCheck { .. } => e,
                other => ClusterError::health(agent_id, other),
            })?;

        debug!(agent_id = %agent_id, healthy = report.healthy, "Health check returned");
        if report.healthy {
            Ok(())
        } else {
            let detail = report.detail.unwrap_or_else(|| "reported unhealthy".into());
            Err(ClusterError::health(agent_id, detail))
        }
    }
}
