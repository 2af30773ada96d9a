use crate::config::RetryPolicy;
use crate::dispatcher::{Dispatcher, Execution};
use crate::registry::AgentRegistry;
use crate::tracker::JobTracker;
use crate::types::{Job, RecoveryOutcome, RecoveryReport};
use clusterbuster_core::{ClusterError, JobStatus};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Moves the jobs of a failed agent onto healthy agents of the same type.
pub struct FailureRecovery {
    registry: Arc<AgentRegistry>,
    tracker: Arc<JobTracker>,
    dispatcher: Arc<Dispatcher>,
    policy: RetryPolicy,
}

impl FailureRecovery {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tracker: Arc<JobTracker>,
        dispatcher: Arc<Dispatcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            tracker,
            dispatcher,
            policy,
        }
    }

    /// Reassign every non-terminal job on `agent_id`.
    ///
    /// Jobs are recovered independently: a job that cannot be reassigned is
    /// reported as exhausted and the others carry on.
    pub async fn handle_agent_failure(&self, agent_id: &str) -> RecoveryReport {
        let affected = self.tracker.affected_by(agent_id);
        if affected.is_empty() {
            debug!(agent_id = %agent_id, "No jobs to recover");
            return RecoveryReport {
                agent_id: agent_id.to_string(),
                outcomes: Vec::new(),
            };
        }
        warn!(agent_id = %agent_id, jobs = affected.len(), "Recovering jobs from failed agent");

        let reason = format!("agent {agent_id} failed health check");
        let outcomes = join_all(
            affected
                .into_iter()
                .map(|job| self.recover(job, agent_id, &reason)),
        )
        .await;

        let report = RecoveryReport {
            agent_id: agent_id.to_string(),
            outcomes,
        };
        info!(
            agent_id = %agent_id,
            recovered = report.recovered(),
            exhausted = report.exhausted(),
            "Recovery pass finished"
        );
        report
    }

    async fn recover(&self, job: Job, failed_agent: &str, reason: &str) -> RecoveryOutcome {
        let task_id = job.task_id();
        if matches!(job.status, JobStatus::Running | JobStatus::Reassigned) {
            if let Err(e) = self.tracker.mark_failed(task_id, reason) {
                debug!(task_id = %task_id, error = %e, "Job settled before recovery");
                return self.skipped(task_id);
            }
        }

        let mut excluded = HashSet::from([failed_agent.to_string()]);
        loop {
            let Some(current) = self.tracker.get(task_id) else {
                return self.skipped(task_id);
            };
            if current.status != JobStatus::Failed {
                return self.skipped(task_id);
            }
            if current.retries >= self.policy.max_reassignments {
                return self.exhausted(task_id, "retry limit reached");
            }
            let Some(reservation) = self.registry.reserve(&current.task.task_type, &excluded)
            else {
                return self.exhausted(task_id, "no replacement agent");
            };

            let delay = self.policy.backoff(current.retries);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let replacement = reservation.agent_id().to_string();
            let claim = self
                .tracker
                .mark_reassigned(task_id, &replacement, current.retries);
            let retries = match claim {
                Ok(retries) => retries,
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "Reassignment claimed elsewhere");
                    return self.skipped(task_id);
                }
            };
            info!(
                task_id = %task_id,
                from = %failed_agent,
                to = %replacement,
                retries,
                "Reassigning task"
            );

            let ticket = match self.tracker.resume(task_id) {
                Ok(ticket) => ticket,
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "Job moved on before resuming");
                    return self.skipped(task_id);
                }
            };
            match self.dispatcher.run(current.task, reservation, ticket).await {
                Execution::Completed(output) => {
                    self.dispatcher.notify(task_id, Ok(output));
                    return RecoveryOutcome::Recovered {
                        task_id,
                        agent_id: replacement,
                        retries,
                    };
                }
                Execution::Failed(error) => {
                    warn!(
                        task_id = %task_id,
                        agent_id = %replacement,
                        error = %error,
                        "Replacement agent failed, trying another"
                    );
                    excluded.insert(replacement);
                }
                Execution::Cancelled | Execution::Superseded => return self.skipped(task_id),
            }
        }
    }

    fn exhausted(&self, task_id: Uuid, why: &str) -> RecoveryOutcome {
        let error = ClusterError::ReassignmentExhausted { task_id };
        if !self.tracker.mark_exhausted(task_id) {
            return self.skipped(task_id);
        }
        warn!(task_id = %task_id, reason = why, "Reassignment exhausted");
        self.dispatcher.notify(task_id, Err(error.clone()));
        RecoveryOutcome::Exhausted { task_id, error }
    }

    fn skipped(&self, task_id: Uuid) -> RecoveryOutcome {
        // a dropped record was cancelled on the way out
        let status = self
            .tracker
            .status(task_id)
            .unwrap_or(JobStatus::Cancelled);
        RecoveryOutcome::Skipped { task_id, status }
    }
}
