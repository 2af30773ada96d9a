use crate::types::{CancelOutcome, Job};
use chrono::Utc;
use clusterbuster_core::{ClusterError, ClusterResult, JobStatus, Task};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct JobEntry {
    job: Job,
    /// Bumped every time a new execution of the job starts.
    epoch: u64,
    /// Cancels the execution started at `epoch`.
    cancellation: CancellationToken,
    /// Recovery gave up on this `failed` job; it is final.
    exhausted: bool,
}

/// Handle for one execution of a job.
///
/// Only the ticket of the latest execution can settle the job; results
/// reported through an older ticket are discarded as stale.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub task_id: Uuid,
    pub agent_id: String,
    epoch: u64,
    cancellation: CancellationToken,
}

impl JobTicket {
    /// Token handed to the agent's `execute`.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

/// What happened when a ticket tried to settle its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    /// The job moved on without this execution; carries its current status.
    Stale(JobStatus),
    /// The job record was dropped while executing.
    Missing,
}

/// One record per task id, plus the cancellation handle of its current run.
pub struct JobTracker {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<JobEntry>>>>,
    next_epoch: AtomicU64,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    fn epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::SeqCst)
    }

    fn entry(&self, task_id: Uuid) -> Option<Arc<Mutex<JobEntry>>> {
        self.jobs.read().get(&task_id).cloned()
    }

    /// Start a fresh execution: create the job as `running`, or overwrite
    /// an existing record for the same task id. Retries carry over and any
    /// execution still attached to the old record is cancelled.
    pub fn begin(&self, task: Task, agent_id: &str) -> JobTicket {
        let task_id = task.id;
        let epoch = self.epoch();
        let cancellation = CancellationToken::new();

        let mut jobs = self.jobs.write();
        let retries = match jobs.get(&task_id) {
            Some(previous) => {
                let previous = previous.lock();
                previous.cancellation.cancel();
                debug!(task_id = %task_id, from = %previous.job.status, "Overwriting job record");
                previous.job.retries
            }
            None => 0,
        };
        jobs.insert(
            task_id,
            Arc::new(Mutex::new(JobEntry {
                job: Job {
                    task,
                    agent_id: agent_id.to_string(),
                    started_at: Utc::now(),
                    status: JobStatus::Running,
                    retries,
                    error: None,
                    finished_at: None,
                },
                epoch,
                cancellation: cancellation.clone(),
                exhausted: false,
            })),
        );

        JobTicket {
            task_id,
            agent_id: agent_id.to_string(),
            epoch,
            cancellation,
        }
    }

    /// Move a `reassigned` job to `running` on the agent recorded by
    /// [`mark_reassigned`](Self::mark_reassigned).
    pub fn resume(&self, task_id: Uuid) -> ClusterResult<JobTicket> {
        let entry = self
            .entry(task_id)
            .ok_or(ClusterError::TaskNotFound(task_id))?;
        let mut entry = entry.lock();
        if entry.job.status != JobStatus::Reassigned {
            return Err(invalid(&entry.job, JobStatus::Running));
        }

        let epoch = self.epoch();
        let cancellation = CancellationToken::new();
        entry.epoch = epoch;
        entry.cancellation = cancellation.clone();
        entry.job.status = JobStatus::Running;
        entry.job.started_at = Utc::now();
        Ok(JobTicket {
            task_id,
            agent_id: entry.job.agent_id.clone(),
            epoch,
            cancellation,
        })
    }

    /// Record a successful execution.
    pub fn complete(&self, ticket: &JobTicket) -> Settlement {
        self.settle(ticket, |job| {
            job.status = JobStatus::Completed;
            job.error = None;
        })
    }

    /// Record a failed execution. The job stays `failed`; nothing is retried here.
    pub fn fail(&self, ticket: &JobTicket, error: &ClusterError) -> Settlement {
        let cause = error.to_string();
        self.settle(ticket, move |job| {
            job.status = JobStatus::Failed;
            job.error = Some(cause);
        })
    }

    fn settle(&self, ticket: &JobTicket, apply: impl FnOnce(&mut Job)) -> Settlement {
        let Some(entry) = self.entry(ticket.task_id) else {
            return Settlement::Missing;
        };
        let mut entry = entry.lock();
        if entry.epoch != ticket.epoch || entry.job.status != JobStatus::Running {
            debug!(
                task_id = %ticket.task_id,
                status = %entry.job.status,
                "Discarding stale execution result"
            );
            return Settlement::Stale(entry.job.status);
        }
        apply(&mut entry.job);
        entry.job.finished_at = Some(Utc::now());
        Settlement::Applied
    }

    /// Fail a job whose agent went away. The running execution, if any, is
    /// cancelled and its eventual result will be discarded.
    pub fn mark_failed(&self, task_id: Uuid, reason: &str) -> ClusterResult<()> {
        let entry = self
            .entry(task_id)
            .ok_or(ClusterError::TaskNotFound(task_id))?;
        let mut entry = entry.lock();
        transition(&entry.job, JobStatus::Failed)?;
        entry.cancellation.cancel();
        entry.job.status = JobStatus::Failed;
        entry.job.error = Some(reason.to_string());
        entry.job.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Hand a `failed` job to `agent_id` and count the reassignment.
    ///
    /// `observed_retries` must match the record, so two recovery passes
    /// racing for the same job cannot both claim it. Returns the new count.
    pub fn mark_reassigned(
        &self,
        task_id: Uuid,
        agent_id: &str,
        observed_retries: u32,
    ) -> ClusterResult<u32> {
        let entry = self
            .entry(task_id)
            .ok_or(ClusterError::TaskNotFound(task_id))?;
        let mut entry = entry.lock();
        transition(&entry.job, JobStatus::Reassigned)?;
        if entry.job.retries != observed_retries {
            return Err(invalid(&entry.job, JobStatus::Reassigned));
        }
        entry.job.status = JobStatus::Reassigned;
        entry.job.agent_id = agent_id.to_string();
        entry.job.retries += 1;
        entry.job.error = None;
        entry.job.finished_at = None;
        Ok(entry.job.retries)
    }

    /// Close a `failed` job that recovery could not place. It is left out
    /// of later [`affected_by`](Self::affected_by) results. Returns `false`
    /// if the job is gone, no longer `failed`, or already closed.
    pub fn mark_exhausted(&self, task_id: Uuid) -> bool {
        let Some(entry) = self.entry(task_id) else {
            return false;
        };
        let mut entry = entry.lock();
        if entry.job.status != JobStatus::Failed || entry.exhausted {
            return false;
        }
        entry.exhausted = true;
        true
    }

    /// Cancel a dispatched job. The agent is signalled through the job's
    /// token; the record becomes `cancelled` whether or not it listens.
    pub fn cancel(&self, task_id: Uuid) -> ClusterResult<CancelOutcome> {
        let entry = self
            .entry(task_id)
            .ok_or(ClusterError::TaskNotFound(task_id))?;
        let mut entry = entry.lock();
        if entry.job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished(entry.job.status));
        }
        entry.cancellation.cancel();
        entry.job.status = JobStatus::Cancelled;
        entry.job.finished_at = Some(Utc::now());
        Ok(CancelOutcome::Cancelled)
    }

    /// Jobs on `agent_id` that recovery should still act on, oldest first:
    /// non-terminal and not already given up on.
    pub fn affected_by(&self, agent_id: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter_map(|entry| {
                let entry = entry.lock();
                (entry.job.agent_id == agent_id
                    && !entry.job.status.is_terminal()
                    && !entry.exhausted)
                    .then(|| entry.job.clone())
            })
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    pub fn get(&self, task_id: Uuid) -> Option<Job> {
        self.entry(task_id).map(|entry| entry.lock().job.clone())
    }

    pub fn status(&self, task_id: Uuid) -> Option<JobStatus> {
        self.entry(task_id).map(|entry| entry.lock().job.status)
    }

    /// Every job record, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .map(|entry| entry.lock().job.clone())
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    /// Jobs that are not `completed` or `cancelled`.
    pub fn active(&self) -> Vec<Job> {
        self.snapshot()
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect()
    }

    /// Forget a job. A still-running execution is cancelled.
    pub fn drop_job(&self, task_id: Uuid) -> Option<Job> {
        let entry = self.jobs.write().remove(&task_id)?;
        let entry = entry.lock();
        if !entry.job.status.is_terminal() {
            entry.cancellation.cancel();
        }
        Some(entry.job.clone())
    }

    /// Remove every `completed` and `cancelled` record. Returns how many went.
    pub fn prune_finished(&self) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.lock().job.status.is_terminal());
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(job: &Job, to: JobStatus) -> ClusterError {
    ClusterError::InvalidTransition {
        task_id: job.task_id(),
        from: job.status,
        to,
    }
}

fn transition(job: &Job, to: JobStatus) -> ClusterResult<()> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(invalid(job, to))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("search", serde_json::json!({"q": "rust"}))
    }

    #[test]
    fn test_begin_creates_running_job() {
        let tracker = JobTracker::new();
        let t = task();
        let ticket = tracker.begin(t.clone(), "agent-1");

        let job = tracker.get(t.id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.agent_id, "agent-1");
        assert_eq!(job.retries, 0);
        assert_eq!(ticket.agent_id, "agent-1");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_complete_and_fail() {
        let tracker = JobTracker::new();
        let ok = task();
        let bad = task();
        let ok_ticket = tracker.begin(ok.clone(), "a");
        let bad_ticket = tracker.begin(bad.clone(), "a");

        assert_eq!(tracker.complete(&ok_ticket), Settlement::Applied);
        let err = ClusterError::execution(bad.id, "boom");
        assert_eq!(tracker.fail(&bad_ticket, &err), Settlement::Applied);

        assert_eq!(tracker.status(ok.id), Some(JobStatus::Completed));
        let failed = tracker.get(bad.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("boom"));
        assert!(failed.finished_at.is_some());
    }

    #[test]
    fn test_completed_job_cannot_settle_twice() {
        let tracker = JobTracker::new();
        let t = task();
        let ticket = tracker.begin(t.clone(), "a");
        tracker.complete(&ticket);

        let err = ClusterError::execution(t.id, "late");
        assert_eq!(
            tracker.fail(&ticket, &err),
            Settlement::Stale(JobStatus::Completed)
        );
    }

    #[test]
    fn test_cancel_discards_late_result() {
        let tracker = JobTracker::new();
        let t = task();
        let ticket = tracker.begin(t.clone(), "a");

        assert_eq!(tracker.cancel(t.id).unwrap(), CancelOutcome::Cancelled);
        assert!(ticket.cancellation().is_cancelled());
        assert_eq!(
            tracker.complete(&ticket),
            Settlement::Stale(JobStatus::Cancelled)
        );
        assert_eq!(tracker.status(t.id), Some(JobStatus::Cancelled));
        assert_eq!(
            tracker.cancel(t.id).unwrap(),
            CancelOutcome::AlreadyFinished(JobStatus::Cancelled)
        );
    }

    #[test]
    fn test_cancel_unknown_task() {
        let tracker = JobTracker::new();
        let id = Uuid::new_v4();
        assert_eq!(tracker.cancel(id), Err(ClusterError::TaskNotFound(id)));
    }

    #[test]
    fn test_reassignment_cycle() {
        let tracker = JobTracker::new();
        let t = task();
        let first = tracker.begin(t.clone(), "a");

        tracker
            .mark_failed(t.id, "agent a failed health check")
            .unwrap();
        assert!(first.cancellation().is_cancelled());

        assert_eq!(tracker.mark_reassigned(t.id, "b", 0).unwrap(), 1);
        let job = tracker.get(t.id).unwrap();
        assert_eq!(job.status, JobStatus::Reassigned);
        assert_eq!(job.agent_id, "b");
        assert!(job.error.is_none());

        let second = tracker.resume(t.id).unwrap();
        assert_eq!(second.agent_id, "b");
        // the interrupted execution on "a" cannot settle the resumed job
        assert_eq!(
            tracker.complete(&first),
            Settlement::Stale(JobStatus::Running)
        );
        assert_eq!(tracker.complete(&second), Settlement::Applied);

        let job = tracker.get(t.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retries, 1);
    }

    #[test]
    fn test_reassign_claim_is_exclusive() {
        let tracker = JobTracker::new();
        let t = task();
        tracker.begin(t.clone(), "a");
        tracker.mark_failed(t.id, "down").unwrap();

        assert!(tracker.mark_reassigned(t.id, "b", 0).is_ok());
        let err = tracker.mark_reassigned(t.id, "c", 0).unwrap_err();
        assert!(matches!(err, ClusterError::InvalidTransition { .. }));
        assert_eq!(tracker.get(t.id).unwrap().agent_id, "b");
    }

    #[test]
    fn test_stale_retry_count_is_rejected() {
        let tracker = JobTracker::new();
        let t = task();
        tracker.begin(t.clone(), "a");
        tracker.mark_failed(t.id, "down").unwrap();
        tracker.mark_reassigned(t.id, "b", 0).unwrap();
        tracker.resume(t.id).unwrap();
        tracker.mark_failed(t.id, "down again").unwrap();

        assert!(tracker.mark_reassigned(t.id, "c", 0).is_err());
        assert_eq!(tracker.mark_reassigned(t.id, "c", 1).unwrap(), 2);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let tracker = JobTracker::new();
        let t = task();
        let ticket = tracker.begin(t.clone(), "a");

        // running jobs must fail before they can be reassigned
        let err = tracker.mark_reassigned(t.id, "b", 0).unwrap_err();
        assert_eq!(
            err,
            ClusterError::InvalidTransition {
                task_id: t.id,
                from: JobStatus::Running,
                to: JobStatus::Reassigned,
            }
        );
        assert!(tracker.resume(t.id).is_err());

        tracker.complete(&ticket);
        assert!(tracker.mark_failed(t.id, "late").is_err());
    }

    #[test]
    fn test_retries_survive_overwrite() {
        let tracker = JobTracker::new();
        let t = task();
        let first = tracker.begin(t.clone(), "a");
        tracker.mark_failed(t.id, "down").unwrap();
        tracker.mark_reassigned(t.id, "b", 0).unwrap();

        let second = tracker.begin(t.clone(), "c");
        assert!(first.cancellation().is_cancelled());
        assert!(!second.cancellation().is_cancelled());
        assert_eq!(tracker.get(t.id).unwrap().retries, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_affected_by_filters_agent_and_terminal() {
        let tracker = JobTracker::new();
        let running = task();
        let done = task();
        let elsewhere = task();
        tracker.begin(running.clone(), "a");
        let done_ticket = tracker.begin(done.clone(), "a");
        tracker.begin(elsewhere, "b");
        tracker.complete(&done_ticket);

        let affected: Vec<Uuid> = tracker.affected_by("a").iter().map(Job::task_id).collect();
        assert_eq!(affected, vec![running.id]);
        assert_eq!(tracker.active().len(), 2);
    }

    #[test]
    fn test_exhausted_job_leaves_affected_set() {
        let tracker = JobTracker::new();
        let t = task();
        tracker.begin(t.clone(), "a");

        // only a failed job can be closed
        assert!(!tracker.mark_exhausted(t.id));
        tracker.mark_failed(t.id, "agent down").unwrap();
        assert!(tracker.mark_exhausted(t.id));
        assert!(!tracker.mark_exhausted(t.id));

        assert!(tracker.affected_by("a").is_empty());
        assert_eq!(tracker.status(t.id), Some(JobStatus::Failed));
        assert_eq!(tracker.active().len(), 1);
        assert!(!tracker.mark_exhausted(Uuid::new_v4()));
    }

    #[test]
    fn test_drop_and_prune() {
        let tracker = JobTracker::new();
        let keep = task();
        let done = task();
        let dropped = task();
        tracker.begin(keep.clone(), "a");
        let done_ticket = tracker.begin(done.clone(), "a");
        let dropped_ticket = tracker.begin(dropped.clone(), "a");
        tracker.complete(&done_ticket);

        let job = tracker.drop_job(dropped.id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(dropped_ticket.cancellation().is_cancelled());
        assert_eq!(tracker.complete(&dropped_ticket), Settlement::Missing);

        assert_eq!(tracker.prune_finished(), 1);
        assert!(tracker.get(done.id).is_none());
        assert!(tracker.get(keep.id).is_some());
        assert!(tracker.drop_job(Uuid::new_v4()).is_none());
    }
}
