use crate::config::OrchestratorConfig;
use crate::dispatcher::{Dispatcher, TaskTicket};
use crate::health::HealthMonitor;
use crate::monitor::OrchestratorSnapshot;
use crate::recovery::FailureRecovery;
use crate::registry::AgentRegistry;
use crate::task_queue::TaskQueue;
use crate::tracker::JobTracker;
use crate::types::{CancelOutcome, DispatchReport, Job, RecoveryReport, SweepReport};
use clusterbuster_core::{Agent, ClusterError, ClusterResult, Priority, Task};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

/// Front door of the cluster: owns the registry, queue and job tracker and
/// wires dispatch, health probing and failure recovery together.
///
/// Every method takes `&self`; share the orchestrator behind an `Arc`.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    tracker: Arc<JobTracker>,
    queue: Mutex<TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    recovery: Arc<FailureRecovery>,
    health: HealthMonitor,
    submitted: Notify,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let tracker = Arc::new(JobTracker::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            config.dispatch.clone(),
        ));
        let recovery = Arc::new(FailureRecovery::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&dispatcher),
            config.retry.clone(),
        ));
        let health = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&recovery),
            config.health.check_timeout(),
        );

        Self {
            config,
            registry,
            tracker,
            queue: Mutex::new(TaskQueue::new()),
            dispatcher,
            recovery,
            health,
            submitted: Notify::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        self.registry.register(agent)
    }

    pub fn unregister_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.registry.unregister(agent_id)
    }

    /// Queue a task for the next dispatch cycle.
    pub fn submit(&self, task: Task, priority: Priority) -> Uuid {
        let task_type = task.task_type.clone();
        let task_id = self.queue.lock().enqueue(task, priority);
        info!(task_id = %task_id, task_type = %task_type, priority = %priority, "Task submitted");
        self.submitted.notify_one();
        task_id
    }

    /// Queue a task and get a ticket for its final result.
    pub fn submit_and_watch(&self, task: Task, priority: Priority) -> TaskTicket {
        let ticket = self.dispatcher.watch(task.id);
        self.submit(task, priority);
        ticket
    }

    /// Bypass the queue: assign `task` now and wait for its result.
    pub async fn assign(&self, task: Task) -> ClusterResult<Value> {
        self.dispatcher.assign(task).await
    }

    /// Drain the queue once and dispatch everything in it.
    pub async fn run_dispatch_cycle(&self) -> DispatchReport {
        self.dispatcher.process_queue(&self.queue).await
    }

    /// Check every agent and recover the jobs of those that fail.
    pub async fn run_health_sweep(&self) -> SweepReport {
        self.health.sweep().await
    }

    /// Check every agent and update health flags only. Follow up with
    /// [`handle_agent_failure`](Self::handle_agent_failure) for each of
    /// [`SweepReport::failed_agents`].
    pub async fn run_health_checks(&self) -> SweepReport {
        self.health.check().await
    }

    /// Treat `agent_id` as failed and move its jobs elsewhere.
    pub async fn handle_agent_failure(&self, agent_id: &str) -> RecoveryReport {
        self.registry.set_healthy(agent_id, false);
        self.recovery.handle_agent_failure(agent_id).await
    }

    /// Cancel a queued or dispatched task.
    ///
    /// A task that has not started, whether still queued or drained and
    /// waiting for a dispatch slot, is removed and never dispatched. A
    /// started one has its agent signalled and is marked `cancelled`; any
    /// late result is discarded.
    pub fn cancel(&self, task_id: Uuid) -> ClusterResult<CancelOutcome> {
        let withdrawn = {
            // same lock order as the drain: queue, then staging
            let mut queue = self.queue.lock();
            queue.remove(task_id) > 0 || self.dispatcher.unstage(task_id).is_some()
        };
        if withdrawn {
            info!(task_id = %task_id, "Cancelled queued task");
            self.dispatcher
                .notify(task_id, Err(ClusterError::Cancelled { task_id }));
            return Ok(CancelOutcome::Dequeued);
        }

        let outcome = self.tracker.cancel(task_id)?;
        if outcome == CancelOutcome::Cancelled {
            info!(task_id = %task_id, "Cancelled running task");
            self.dispatcher
                .notify(task_id, Err(ClusterError::Cancelled { task_id }));
        }
        Ok(outcome)
    }

    /// Forget a job record. An unfinished job is cancelled first.
    pub fn drop_job(&self, task_id: Uuid) -> Option<Job> {
        let job = self.tracker.drop_job(task_id)?;
        if !job.status.is_terminal() {
            self.dispatcher
                .notify(task_id, Err(ClusterError::Cancelled { task_id }));
        }
        Some(job)
    }

    /// Remove `completed` and `cancelled` job records.
    pub fn prune_finished(&self) -> usize {
        let pruned = self.tracker.prune_finished();
        if pruned > 0 {
            info!(pruned, "Pruned finished jobs");
        }
        pruned
    }

    pub fn job(&self, task_id: Uuid) -> Option<Job> {
        self.tracker.get(task_id)
    }

    pub fn active_jobs(&self) -> Vec<Job> {
        self.tracker.active()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot::capture(
            &self.registry,
            &self.queue,
            self.dispatcher.staged(),
            &self.tracker,
        )
    }

    pub fn to_json(&self) -> Value {
        self.snapshot().to_json()
    }

    /// Wakes the supervisor when work is submitted.
    pub(crate) fn submissions(&self) -> &Notify {
        &self.submitted
    }
}
