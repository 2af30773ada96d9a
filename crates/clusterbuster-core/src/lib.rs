//! Core types and error definitions for ClusterBuster.
//!
//! This crate holds everything that crosses the boundary between the
//! orchestrator and the agents it drives, so that agent implementations can
//! depend on it without pulling in the scheduling engine.
//!
//! # Main types
//!
//! - [`ClusterError`]: Error taxonomy for dispatch, health and recovery.
//! - [`ClusterResult`]: Convenience alias for `Result<T, ClusterError>`.
//! - [`Task`] / [`Priority`]: Submitted work and its dispatch tier.
//! - [`JobStatus`]: Job lifecycle state machine.
//! - [`Agent`] / [`HealthReport`]: The capability every worker exposes.

/// Agent capability trait.
pub mod agent;
/// Error taxonomy.
pub mod error;
/// Tasks, priorities and job status.
pub mod task;

pub use agent::{Agent, HealthReport};
pub use error::{ClusterError, ClusterResult};
pub use task::{JobStatus, Priority, Task};
