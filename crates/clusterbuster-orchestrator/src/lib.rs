//! Task distribution across a pool of typed agents.
//!
//! Submitted tasks wait in a two-tier priority queue until a dispatch cycle
//! binds each one to the least-loaded healthy agent of the matching type.
//! Health sweeps check every agent; the jobs of an agent that fails a check
//! are moved to a replacement of the same type under a bounded retry policy.
//!
//! # Main types
//!
//! - [`Orchestrator`]: facade owning the registry, queue and job tracker.
//! - [`Supervisor`]: background loop driving dispatch cycles and health sweeps.
//! - [`TaskQueue`]: priority-then-FIFO holding area for submitted tasks.
//! - [`AgentRegistry`]: registered agents and least-loaded selection.
//! - [`JobTracker`]: one execution record per task, with its lifecycle.
//! - [`OrchestratorConfig`]: dispatch, health and retry settings.

/// Dispatch, health and retry settings.
pub mod config;
/// Queue draining and single-task assignment.
pub mod dispatcher;
/// The `Orchestrator` facade.
pub mod engine;
/// Agent health probing.
pub mod health;
/// Read-only snapshots of orchestrator state.
pub mod monitor;
/// Reassignment of jobs away from failed agents.
pub mod recovery;
/// Agent registration and selection.
pub mod registry;
/// Background dispatch and sweep loop.
pub mod scheduler;
/// Priority task queue.
pub mod task_queue;
/// Job lifecycle records.
pub mod tracker;
/// Shared orchestration types (jobs, outcomes, reports).
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DispatchConfig, HealthConfig, OrchestratorConfig, RetryPolicy};
pub use dispatcher::{Dispatcher, TaskTicket};
pub use engine::Orchestrator;
pub use health::HealthMonitor;
pub use monitor::{JobCounts, OrchestratorSnapshot};
pub use recovery::FailureRecovery;
pub use registry::{AgentRegistry, Reservation};
pub use scheduler::Supervisor;
pub use task_queue::TaskQueue;
pub use tracker::{JobTicket, JobTracker, Settlement};
pub use types::{
    AgentStatus, CancelOutcome, DispatchOutcome, DispatchReport, Job, QueueEntry,
    RecoveryOutcome, RecoveryReport, SweepReport,
};
