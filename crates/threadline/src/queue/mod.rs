//! Admission-controlled queue
//!
//! This module provides:
//! - [`TaskPool`] - queued / active / completed bookkeeping with a concurrency ceiling
//! - [`PoolSignal`] - scheduling notifications (interval ticks, drain announcements)
//! - [`StatusReport`] - projections over the buckets as items, counts or percentages

mod report;
mod task_pool;

pub use report::{FieldSelector, StatusField, StatusFormat, StatusReport, StatusValue};
pub use task_pool::{PoolSignal, TaskPool};

/// Task pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskPoolError {
    /// Unknown field requested from a status query
    #[error("invalid status field: \"{0}\"")]
    InvalidField(String),
}
