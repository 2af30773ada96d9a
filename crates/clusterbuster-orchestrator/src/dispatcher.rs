use crate::config::DispatchConfig;
use crate::registry::{AgentRegistry, Reservation};
use crate::task_queue::{sort_for_dispatch, TaskQueue};
use crate::tracker::{JobTicket, JobTracker, Settlement};
use crate::types::{DispatchOutcome, DispatchReport, QueueEntry};
use clusterbuster_core::{ClusterError, ClusterResult, JobStatus, Task};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Resolves once with the final result of a submitted task.
#[derive(Debug)]
pub struct TaskTicket {
    pub task_id: Uuid,
    receiver: oneshot::Receiver<ClusterResult<Value>>,
}

impl TaskTicket {
    /// Wait for the task's result. A ticket whose task was discarded without
    /// a result resolves to [`ClusterError::Cancelled`].
    pub async fn outcome(self) -> ClusterResult<Value> {
        let task_id = self.task_id;
        self.receiver
            .await
            .unwrap_or(Err(ClusterError::Cancelled { task_id }))
    }
}

/// How one execution of a job ended, from the tracker's point of view.
#[derive(Debug)]
pub(crate) enum Execution {
    Completed(Value),
    Failed(ClusterError),
    /// The job was cancelled or dropped; the agent's result was discarded.
    Cancelled,
    /// Recovery took the job over; the agent's result was discarded.
    Superseded,
}

/// Binds tasks to agents and records how each execution ends.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    tracker: Arc<JobTracker>,
    config: DispatchConfig,
    waiters: Mutex<HashMap<Uuid, Vec<oneshot::Sender<ClusterResult<Value>>>>>,
    /// Drained entries that have not started yet. Still cancellable.
    staged: Mutex<HashMap<Uuid, QueueEntry>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tracker: Arc<JobTracker>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            config,
            waiters: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Withdraw a drained entry that has not started. `None` once its job
    /// has begun or if it was never staged.
    pub(crate) fn unstage(&self, task_id: Uuid) -> Option<QueueEntry> {
        self.staged.lock().remove(&task_id)
    }

    /// Drained entries still waiting for a dispatch slot, in dispatch order.
    pub fn staged(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.staged.lock().values().cloned().collect();
        sort_for_dispatch(&mut entries);
        entries
    }

    /// Register interest in the final result of `task_id`.
    pub fn watch(&self, task_id: Uuid) -> TaskTicket {
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().entry(task_id).or_default().push(sender);
        TaskTicket { task_id, receiver }
    }

    /// Deliver a final result to everyone watching `task_id`.
    pub(crate) fn notify(&self, task_id: Uuid, result: ClusterResult<Value>) {
        let Some(senders) = self.waiters.lock().remove(&task_id) else {
            return;
        };
        for sender in senders {
            // receiver may have stopped listening
            let _ = sender.send(result.clone());
        }
    }

    /// Assign one task directly and wait for its final result.
    ///
    /// Fails with [`ClusterError::NoAvailableAgent`] when no candidate exists,
    /// leaving the tracker untouched. If the job is taken over by recovery
    /// while it runs, the result is the one recovery produces.
    pub async fn assign(&self, task: Task) -> ClusterResult<Value> {
        let ticket = self.watch(task.id);
        self.dispatch(task, false).await;
        ticket.outcome().await
    }

    /// Drain `queue` and dispatch every entry in queue order.
    ///
    /// Up to `max_concurrent_dispatches` entries run at once. With
    /// `abort_on_no_agent` set, the first entry that finds no agent stops the
    /// drain: entries not yet started go back on the queue as `Deferred`.
    pub async fn process_queue(&self, queue: &Mutex<TaskQueue>) -> DispatchReport {
        let entries = {
            let mut queue = queue.lock();
            let entries = queue.drain();
            // staged under the queue lock so cancel always finds the entry
            self.staged
                .lock()
                .extend(entries.iter().map(|e| (e.task.id, e.clone())));
            entries
        };
        if entries.is_empty() {
            return DispatchReport::default();
        }
        info!(count = entries.len(), "Draining task queue");

        let aborted = AtomicBool::new(false);
        let deferred = Mutex::new(Vec::new());
        let outcomes: Vec<DispatchOutcome> = stream::iter(entries)
            .map(|entry| self.dispatch_entry(entry.task, &aborted, &deferred))
            .buffered(self.config.max_concurrent_dispatches.max(1))
            .collect()
            .await;

        let deferred = deferred.into_inner();
        if !deferred.is_empty() {
            let mut queue = queue.lock();
            let mut staged = self.staged.lock();
            let back: Vec<QueueEntry> = deferred
                .iter()
                .filter_map(|task_id| staged.remove(task_id))
                .collect();
            warn!(count = back.len(), "Drain aborted, entries returned to queue");
            queue.requeue(back);
        }
        DispatchReport { outcomes }
    }

    async fn dispatch_entry(
        &self,
        task: Task,
        aborted: &AtomicBool,
        deferred: &Mutex<Vec<Uuid>>,
    ) -> DispatchOutcome {
        let task_id = task.id;
        if aborted.load(Ordering::SeqCst) {
            if !self.staged.lock().contains_key(&task_id) {
                return DispatchOutcome::Cancelled { task_id };
            }
            deferred.lock().push(task_id);
            return DispatchOutcome::Deferred { task_id };
        }

        let outcome = self.dispatch(task, true).await;
        if self.config.abort_on_no_agent
            && matches!(
                outcome,
                DispatchOutcome::Failed {
                    error: ClusterError::NoAvailableAgent { .. },
                    ..
                }
            )
        {
            aborted.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Reserve an agent, run the task once, and notify waiters of a
    /// completion or failure. A `staged` task that was cancelled while it
    /// waited is not started.
    async fn dispatch(&self, task: Task, staged: bool) -> DispatchOutcome {
        let task_id = task.id;
        let reservation = self.registry.reserve(&task.task_type, &HashSet::new());

        let ticket = {
            let mut staged_entries = self.staged.lock();
            if staged && staged_entries.remove(&task_id).is_none() {
                debug!(task_id = %task_id, "Task cancelled before dispatch");
                return DispatchOutcome::Cancelled { task_id };
            }
            // begun under the staging lock so a cancel sees the entry or the job
            reservation
                .as_ref()
                .map(|r| self.tracker.begin(task.clone(), r.agent_id()))
        };

        let (Some(reservation), Some(ticket)) = (reservation, ticket) else {
            let error = ClusterError::NoAvailableAgent {
                task_type: task.task_type.clone(),
            };
            warn!(task_id = %task_id, task_type = %task.task_type, "No available agent");
            self.notify(task_id, Err(error.clone()));
            return DispatchOutcome::Failed { task_id, error };
        };

        let agent_id = reservation.agent_id().to_string();
        match self.run(task, reservation, ticket).await {
            Execution::Completed(output) => {
                self.notify(task_id, Ok(output.clone()));
                DispatchOutcome::Completed {
                    task_id,
                    agent_id,
                    output,
                }
            }
            Execution::Failed(error) => {
                self.notify(task_id, Err(error.clone()));
                DispatchOutcome::Failed { task_id, error }
            }
            Execution::Cancelled => DispatchOutcome::Cancelled { task_id },
            Execution::Superseded => DispatchOutcome::Superseded { task_id },
        }
    }

    /// Execute `task` on the reserved agent under `ticket` and settle the job.
    ///
    /// Waiters are not notified here; callers decide what counts as final.
    pub(crate) async fn run(
        &self,
        task: Task,
        reservation: Reservation,
        ticket: JobTicket,
    ) -> Execution {
        let task_id = task.id;
        info!(
            task_id = %task_id,
            agent_id = %ticket.agent_id,
            task_type = %task.task_type,
            "Dispatching task"
        );

        let token = ticket.cancellation();
        let agent = Arc::clone(reservation.agent());
        // the agent's own answer wins when both are ready
        let result = tokio::select! {
            biased;
            result = with_deadline(
                agent.execute(&task, token.clone()),
                self.config.execute_timeout(),
                task_id,
            ) => Some(result),
            () = token.cancelled() => None,
        };
        drop(reservation);

        let result = match result {
            Some(result) => result,
            None => return self.discarded(task_id),
        };

        match result {
            Ok(output) => match self.tracker.complete(&ticket) {
                Settlement::Applied => {
                    info!(task_id = %task_id, agent_id = %ticket.agent_id, "Task completed");
                    Execution::Completed(output)
                }
                Settlement::Stale(status) => discarded_as(status),
                Settlement::Missing => Execution::Cancelled,
            },
            Err(e) => {
                let error = match e {
                    ClusterError::AgentExecution { .. } => e,
                    other => ClusterError::execution(task_id, other),
                };
                match self.tracker.fail(&ticket, &error) {
                    Settlement::Applied => {
                        error!(
                            task_id = %task_id,
                            agent_id = %ticket.agent_id,
                            error = %error,
                            "Task failed"
                        );
                        Execution::Failed(error)
                    }
                    Settlement::Stale(status) => discarded_as(status),
                    Settlement::Missing => Execution::Cancelled,
                }
            }
        }
    }

    pub(crate) fn discarded(&self, task_id: Uuid) -> Execution {
        match self.tracker.status(task_id) {
            Some(status) => discarded_as(status),
            None => Execution::Cancelled,
        }
    }
}

fn discarded_as(status: JobStatus) -> Execution {
    match status {
        JobStatus::Cancelled => Execution::Cancelled,
        _ => Execution::Superseded,
    }
}

/// A timed-out execution counts as an agent failure.
async fn with_deadline<F>(
    execution: F,
    deadline: Option<Duration>,
    task_id: Uuid,
) -> ClusterResult<Value>
where
    F: Future<Output = ClusterResult<Value>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, execution)
            .await
            .unwrap_or_else(|_| {
                Err(ClusterError::execution(
                    task_id,
                    format!("execution timed out after {}ms", deadline.as_millis()),
                ))
            }),
        None => execution.await,
    }
}
