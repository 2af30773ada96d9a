use chrono::{DateTime, Utc};
use clusterbuster_core::{ClusterError, JobStatus, Priority, Task};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task waiting in the queue. Exists only while the task is unassigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub task: Task,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic enqueue order; the FIFO tie-breaker within a tier.
    pub seq: u64,
}

/// The execution record for a task. One per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task: Task,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub status: JobStatus,
    pub retries: u32,
    pub error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn task_id(&self) -> Uuid {
        self.task.id
    }
}

/// Result of dispatching one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed {
        task_id: Uuid,
        agent_id: String,
        output: serde_json::Value,
    },
    Failed {
        task_id: Uuid,
        error: ClusterError,
    },
    /// Not attempted in this drain; the entry is back on the queue.
    Deferred { task_id: Uuid },
    Cancelled { task_id: Uuid },
    /// The job was taken over by failure recovery while executing; its
    /// final result comes from the recovery pass.
    Superseded { task_id: Uuid },
}

impl DispatchOutcome {
    pub fn task_id(&self) -> Uuid {
        match self {
            DispatchOutcome::Completed { task_id, .. }
            | DispatchOutcome::Failed { task_id, .. }
            | DispatchOutcome::Deferred { task_id }
            | DispatchOutcome::Cancelled { task_id }
            | DispatchOutcome::Superseded { task_id } => *task_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed { .. })
    }
}

/// Per-entry outcomes of one dispatch cycle, in drain order.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Failed { .. }))
            .count()
    }

    pub fn deferred(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Deferred { .. }))
            .count()
    }

    /// Task ids in the order they were drained.
    pub fn order(&self) -> Vec<Uuid> {
        self.outcomes.iter().map(DispatchOutcome::task_id).collect()
    }
}

/// What happened to one job during failure recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Reassigned and completed on `agent_id`.
    Recovered {
        task_id: Uuid,
        agent_id: String,
        retries: u32,
    },
    /// Reassignment failed; the job stays `failed`.
    Exhausted { task_id: Uuid, error: ClusterError },
    /// Recovery stopped touching the job because something else settled it
    /// first, e.g. a cancellation. `status` is what the job was left in.
    Skipped { task_id: Uuid, status: JobStatus },
}

impl RecoveryOutcome {
    pub fn task_id(&self) -> Uuid {
        match self {
            RecoveryOutcome::Recovered { task_id, .. }
            | RecoveryOutcome::Exhausted { task_id, .. }
            | RecoveryOutcome::Skipped { task_id, .. } => *task_id,
        }
    }
}

/// Outcomes of one `handle_agent_failure` pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub agent_id: String,
    pub outcomes: Vec<RecoveryOutcome>,
}

impl RecoveryReport {
    pub fn recovered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RecoveryOutcome::Recovered { .. }))
            .count()
    }

    pub fn exhausted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RecoveryOutcome::Exhausted { .. }))
            .count()
    }
}

/// Result of one health sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: Vec<String>,
    /// Contained health check failures, one per failed agent.
    pub failures: Vec<ClusterError>,
    pub recoveries: Vec<RecoveryReport>,
}

impl SweepReport {
    pub fn all_healthy(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of the agents whose health check failed.
    pub fn failed_agents(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().filter_map(|failure| match failure {
            ClusterError::HealthCheck { agent_id, .. } => Some(agent_id.as_str()),
            _ => None,
        })
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue before dispatch.
    Dequeued,
    /// The running job was marked `cancelled` and its agent signalled.
    Cancelled,
    /// The job had already reached a terminal status.
    AlreadyFinished(JobStatus),
}

/// Read-only view of one registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    pub agent_type: String,
    pub reported_load: u32,
    pub in_flight: u32,
    pub available: bool,
    pub healthy: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_report_counts() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let report = DispatchReport {
            outcomes: vec![
                DispatchOutcome::Completed {
                    task_id: a,
                    agent_id: "x".into(),
                    output: serde_json::Value::Null,
                },
                DispatchOutcome::Failed {
                    task_id: b,
                    error: ClusterError::NoAvailableAgent {
                        task_type: "t".into(),
                    },
                },
                DispatchOutcome::Deferred { task_id: c },
            ],
        };
        assert_eq!(report.completed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.deferred(), 1);
        assert_eq!(report.order(), vec![a, b, c]);
    }

    #[test]
    fn test_job_serialization() {
        let job = Job {
            task: Task::new("search", serde_json::json!({})),
            agent_id: "agent-1".into(),
            started_at: Utc::now(),
            status: JobStatus::Failed,
            retries: 2,
            error: Some("boom".into()),
            finished_at: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["retries"], 2);
        assert_eq!(json["task"]["task_type"], "search");
    }
}
