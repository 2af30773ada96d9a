use crate::registry::AgentRegistry;
use crate::task_queue::TaskQueue;
use crate::tracker::JobTracker;
use crate::types::{AgentStatus, Job, QueueEntry};
use chrono::{DateTime, Utc};
use clusterbuster_core::JobStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub reassigned: usize,
    pub cancelled: usize,
}

impl JobCounts {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Reassigned => counts.reassigned += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
                // queued work lives in the queue, never in the tracker
                JobStatus::Queued => {}
            }
        }
        counts
    }
}

/// Point-in-time view of agents, queue and jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub agents: Vec<AgentStatus>,
    /// Queued entries in dispatch order.
    pub queue: Vec<QueueEntry>,
    /// Drained by the running dispatch cycle but not started yet.
    pub staged: Vec<QueueEntry>,
    pub jobs: Vec<Job>,
    pub counts: JobCounts,
}

impl OrchestratorSnapshot {
    /// Read each component once. The parts are individually consistent but
    /// not taken under a common lock.
    pub fn capture(
        registry: &AgentRegistry,
        queue: &Mutex<TaskQueue>,
        staged: Vec<QueueEntry>,
        tracker: &JobTracker,
    ) -> Self {
        let queue = queue.lock().pending();
        let jobs = tracker.snapshot();
        Self {
            taken_at: Utc::now(),
            agents: registry.statuses(),
            queue,
            staged,
            counts: JobCounts::from_jobs(&jobs),
            jobs,
        }
    }

    /// Summary suitable for logs or a status endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "taken_at": self.taken_at,
            "agents": self.agents,
            "queued": self.queue.len(),
            "staged": self.staged.len(),
            "jobs": self.jobs,
            "counts": self.counts,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::MockAgent;
    use clusterbuster_core::{ClusterError, Priority, Task};

    #[test]
    fn test_counts_by_status() {
        let tracker = JobTracker::new();
        let done = Task::new("search", serde_json::json!({}));
        let broken = Task::new("search", serde_json::json!({}));
        tracker.begin(Task::new("search", serde_json::json!({})), "a");
        let done_ticket = tracker.begin(done, "a");
        let broken_ticket = tracker.begin(broken.clone(), "a");
        tracker.complete(&done_ticket);
        tracker.fail(&broken_ticket, &ClusterError::execution(broken.id, "boom"));

        let counts = JobCounts::from_jobs(&tracker.snapshot());
        assert_eq!(
            counts,
            JobCounts {
                running: 1,
                completed: 1,
                failed: 1,
                reassigned: 0,
                cancelled: 0,
            }
        );
    }

    #[test]
    fn test_capture_and_json() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::new("a-1", "search").with_load(2));
        let queue = Mutex::new(TaskQueue::new());
        let high = queue
            .lock()
            .enqueue(Task::new("search", serde_json::json!({})), Priority::High);
        queue
            .lock()
            .enqueue(Task::new("search", serde_json::json!({})), Priority::Normal);
        let tracker = JobTracker::new();

        let snapshot = OrchestratorSnapshot::capture(&registry, &queue, Vec::new(), &tracker);
        assert_eq!(snapshot.queue.len(), 2);
        assert_eq!(snapshot.queue[0].task.id, high);
        assert!(snapshot.jobs.is_empty());

        let json = snapshot.to_json();
        assert_eq!(json["queued"], 2);
        assert_eq!(json["staged"], 0);
        assert_eq!(json["agents"][0]["id"], "a-1");
        assert_eq!(json["agents"][0]["reported_load"], 2);
        assert_eq!(json["counts"]["running"], 0);
    }
}
