use crate::task::JobStatus;
use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`ClusterError`].
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Error taxonomy for the orchestrator and its agent boundary.
///
/// Every variant carries owned, cloneable data so a single failure can be
/// handed both to the dispatch report and to the submitter's waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// No registered agent of this type is available and healthy.
    #[error("No available agent for task type: {task_type}")]
    NoAvailableAgent {
        /// The task type that could not be matched.
        task_type: String,
    },

    /// The agent rejected the task, errored, or timed out during execute.
    #[error("Agent execution failed for task {task_id}: {cause}")]
    AgentExecution {
        /// Task being executed.
        task_id: Uuid,
        /// Human-readable failure cause.
        cause: String,
    },

    /// A health check errored, reported unhealthy, or timed out.
    #[error("Health check failed for agent {agent_id}: {cause}")]
    HealthCheck {
        /// Checked agent.
        agent_id: String,
        /// Human-readable failure cause.
        cause: String,
    },

    /// Recovery could not find (or ran out of) replacement agents.
    #[error("No available agent for failed task reassignment: {task_id}")]
    ReassignmentExhausted {
        /// Task that could not be reassigned.
        task_id: Uuid,
    },

    /// The task was cancelled before it produced a result.
    #[error("Task {task_id} was cancelled")]
    Cancelled {
        /// Cancelled task.
        task_id: Uuid,
    },

    /// No queue entry or job exists for this task.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A job status change that the lifecycle state machine forbids.
    #[error("Invalid job transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job whose transition was rejected.
        task_id: Uuid,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Build an [`ClusterError::AgentExecution`] from any displayable cause.
    pub fn execution(task_id: Uuid, cause: impl std::fmt::Display) -> Self {
        Self::AgentExecution {
            task_id,
            cause: cause.to_string(),
        }
    }

    /// Build a [`ClusterError::HealthCheck`] from any displayable cause.
    pub fn health(agent_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::HealthCheck {
            agent_id: agent_id.into(),
            cause: cause.to_string(),
        }
    }

    /// The task this error belongs to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::AgentExecution { task_id, .. }
            | Self::ReassignmentExhausted { task_id }
            | Self::Cancelled { task_id }
            | Self::InvalidTransition { task_id, .. } => Some(*task_id),
            Self::TaskNotFound(id) => Some(*id),
            Self::NoAvailableAgent { .. } | Self::HealthCheck { .. } | Self::Config(_) => None,
        }
    }
}
