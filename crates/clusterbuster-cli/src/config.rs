//! The `clusterbuster.toml` file: orchestrator settings, the simulated agent
//! pool and the tasks to submit.

use anyhow::Context;
use clusterbuster_core::{Priority, Task};
use clusterbuster_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: Vec<SimAgentConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One simulated agent.
#[derive(Debug, Clone, Deserialize)]
pub struct SimAgentConfig {
    pub id: String,
    pub agent_type: String,
    /// How long each execution takes.
    #[serde(default = "default_latency")]
    pub latency_ms: u64,
    /// Load reported on top of the agent's own in-flight work.
    #[serde(default)]
    pub base_load: u32,
    /// Every n-th execution fails.
    #[serde(default)]
    pub fail_every: Option<u32>,
    /// Health checks start failing after this many successful ones.
    #[serde(default)]
    pub unhealthy_after: Option<u32>,
}

/// A batch of identical tasks to submit.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_count")]
    pub count: u32,
}

impl TaskConfig {
    /// Expand into `count` tasks, each with a fresh id.
    pub fn expand(&self) -> impl Iterator<Item = Task> + '_ {
        (0..self.count).map(|_| {
            Task::new(self.task_type.clone(), self.payload.clone()).with_priority(self.priority)
        })
    }
}

impl ClusterConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config '{}'", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.orchestrator.validate()?;

        let mut ids = HashSet::new();
        for agent in &self.agents {
            anyhow::ensure!(ids.insert(agent.id.as_str()), "duplicate agent id '{}'", agent.id);
            anyhow::ensure!(
                agent.fail_every != Some(0),
                "agent '{}': fail_every must be at least 1",
                agent.id
            );
        }
        Ok(())
    }

    /// Task types with no agent of that type configured.
    pub fn unserved_task_types(&self) -> Vec<&str> {
        let served: HashSet<&str> = self.agents.iter().map(|a| a.agent_type.as_str()).collect();
        let mut unserved: Vec<&str> = self
            .tasks
            .iter()
            .map(|t| t.task_type.as_str())
            .filter(|t| !served.contains(t))
            .collect();
        unserved.sort_unstable();
        unserved.dedup();
        unserved
    }

    pub fn task_count(&self) -> usize {
        self.tasks.iter().map(|t| t.count as usize).sum()
    }
}

fn default_latency() -> u64 {
    50
}

fn default_count() -> u32 {
    1
}
