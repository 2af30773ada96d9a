//! Simulated agents driven by [`SimAgentConfig`].

use crate::config::SimAgentConfig;
use async_trait::async_trait;
use clusterbuster_core::{Agent, ClusterError, ClusterResult, HealthReport, Task};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// An agent that sleeps for a fixed latency and echoes the task back.
pub struct SimulatedAgent {
    id: String,
    agent_type: String,
    latency: Duration,
    base_load: u32,
    fail_every: Option<u32>,
    unhealthy_after: Option<u32>,
    in_flight: AtomicU32,
    executions: AtomicU32,
    checks: AtomicU32,
}

struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedAgent {
    pub fn from_config(config: &SimAgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            agent_type: config.agent_type.clone(),
            latency: Duration::from_millis(config.latency_ms),
            base_load: config.base_load,
            fail_every: config.fail_every,
            unhealthy_after: config.unhealthy_after,
            in_flight: AtomicU32::new(0),
            executions: AtomicU32::new(0),
            checks: AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn current_load(&self) -> u32 {
        self.base_load.saturating_add(self.in_flight.load(Ordering::SeqCst))
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        task: &Task,
        cancellation: CancellationToken,
    ) -> ClusterResult<serde_json::Value> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let run = self.executions.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::select! {
            () = tokio::time::sleep(self.latency) => {}
            () = cancellation.cancelled() => {
                return Err(ClusterError::Cancelled { task_id: task.id });
            }
        }

        if self.fail_every.is_some_and(|n| n > 0 && run % n == 0) {
            return Err(ClusterError::execution(
                task.id,
                format!("simulated failure on execution {run}"),
            ));
        }

        Ok(json!({
            "agent": self.id,
            "task_type": task.task_type,
            "execution": run,
            "echo": task.payload,
        }))
    }

    async fn check_health(&self) -> ClusterResult<HealthReport> {
        let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        match self.unhealthy_after {
            Some(limit) if check > limit => Ok(HealthReport::unhealthy(format!(
                "simulated outage after {limit} checks"
            ))),
            _ => Ok(HealthReport::healthy()),
        }
    }
}
