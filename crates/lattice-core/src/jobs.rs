//! Job types and the boundaries to the scheduler and usage tracker.
//!
//! The job system itself lives outside this workspace; the hub only needs
//! enough shape to relay updates and forward control actions. Producers
//! push [`Job`] values through a `tokio::sync::broadcast` feed; control
//! actions go through [`JobController`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::JobId;
use crate::messages::UsageUpdate;

/// Lifecycle state of a background job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Currently executing.
    Running,
    /// Paused by user request.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Progress through a job's work items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Items processed so far.
    pub current: u64,
    /// Total items (0 when unknown).
    pub total: u64,
}

/// A background job as relayed to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Human-readable description.
    pub description: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Progress through work items.
    pub progress: JobProgress,
    /// Error message when `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp of the last state change.
    pub updated_at: i64,
}

/// Errors surfaced by the job controller boundary.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No job with the given ID.
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// The scheduler rejected the action.
    #[error("job control failed: {0}")]
    Rejected(String),
    /// The scheduler is not available.
    #[error("scheduler unavailable")]
    Unavailable,
}

/// Control actions forwarded to the scheduler.
#[async_trait]
pub trait JobController: Send + Sync {
    /// Pause a running or queued job.
    async fn pause(&self, id: &JobId, reason: &str) -> Result<(), JobError>;

    /// Resume a paused job.
    async fn resume(&self, id: &JobId) -> Result<(), JobError>;

    /// Fetch current job details.
    async fn get(&self, id: &JobId) -> Result<Job, JobError>;
}

/// Point-in-time queue occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs currently executing.
    pub running: u64,
    /// Jobs waiting to execute.
    pub queued: u64,
}

/// Budget spend and limits, in USD.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BudgetSnapshot {
    /// Spent today.
    pub daily: f64,
    /// Spent this week.
    pub weekly: f64,
    /// Spent this month.
    pub monthly: f64,
    /// Daily limit.
    pub daily_limit: f64,
    /// Weekly limit.
    pub weekly_limit: f64,
    /// Monthly limit.
    pub monthly_limit: f64,
}

/// Snapshot provider for the periodic status broadcast.
///
/// Implemented by the scheduler integration; polled by the status
/// broadcaster, never the other way around.
pub trait StatusSource: Send + Sync {
    /// Whether the worker pool is running.
    fn running(&self) -> bool;

    /// Current queue occupancy.
    fn queue_stats(&self) -> QueueStats;

    /// Current budget spend and limits.
    fn budget(&self) -> BudgetSnapshot;
}

/// Snapshot provider for the periodic usage broadcast.
pub trait UsageSource: Send + Sync {
    /// Usage over the trailing window. `None` skips the broadcast
    /// (tracker unavailable is not an error worth surfacing per tick).
    fn usage_since(&self, window: Duration) -> Option<UsageUpdate>;
}
