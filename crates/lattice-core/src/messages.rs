//! Server-pushed wire messages.
//!
//! [`ServerMessage`] is the generic/control payload class: everything the
//! server pushes to clients that is neither a graph nor a log batch. Each
//! variant serializes with a `type` discriminant so the frontend can route
//! without inspecting payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::WatcherId;
use crate::jobs::Job;

/// A message pushed from the server to one or all clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Build/version hello sent once per connection.
    Version {
        /// Semantic version string.
        version: String,
        /// Short commit hash.
        commit: String,
    },

    /// A background job changed state or progressed.
    JobUpdate {
        /// Full job details.
        job: Job,
        /// Unix timestamp of the update.
        timestamp: i64,
        /// Whether this is part of the initial post-connect replay.
        #[serde(skip_serializing_if = "Option::is_none")]
        initial: Option<bool>,
    },

    /// Periodic scheduler/worker status.
    DaemonStatus(DaemonStatus),

    /// Periodic usage statistics.
    UsageUpdate(UsageUpdate),

    /// A watcher matched new data.
    WatcherMatch {
        /// Watcher that matched.
        watcher_id: WatcherId,
        /// The matching record, engine-defined.
        data: Value,
        /// Unix timestamp.
        timestamp: i64,
    },

    /// A watcher failed (parse error, validation error).
    WatcherError {
        /// Watcher that failed.
        watcher_id: WatcherId,
        /// Error message.
        error: String,
        /// Structured error context lines.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        details: Vec<String>,
        /// `"error"` or `"warning"`.
        severity: String,
        /// Unix timestamp.
        timestamp: i64,
    },

    /// Storage approaching a configured bound.
    StorageWarning {
        /// Storage actor approaching its limit.
        actor: String,
        /// Storage context approaching its limit.
        context: String,
        /// Current record count.
        current: u64,
        /// Configured limit.
        limit: u64,
        /// Fill fraction, 0.0–1.0.
        fill_percent: f64,
        /// Unix timestamp.
        timestamp: i64,
    },

    /// A handler-level error surfaced to the client.
    Error {
        /// Error message.
        error: String,
    },
}

/// Scheduler/worker status payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Whether the worker pool is running.
    pub running: bool,
    /// Running + queued jobs.
    pub active_jobs: u64,
    /// Queued jobs only.
    pub queued_jobs: u64,
    /// Load heuristic, 0–100.
    pub load_percent: f64,
    /// Budget spent today (USD).
    pub budget_daily: f64,
    /// Budget spent this week (USD).
    pub budget_weekly: f64,
    /// Budget spent this month (USD).
    pub budget_monthly: f64,
    /// Daily budget limit (USD).
    pub budget_daily_limit: f64,
    /// Weekly budget limit (USD).
    pub budget_weekly_limit: f64,
    /// Monthly budget limit (USD).
    pub budget_monthly_limit: f64,
    /// Server lifecycle state (`running`, `draining`, `stopped`).
    pub server_state: String,
    /// Unix timestamp.
    pub timestamp: i64,
}

/// Usage statistics payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageUpdate {
    /// Total cost over the window (USD).
    pub total_cost: f64,
    /// Total requests.
    pub requests: u64,
    /// Successful requests.
    pub success: u64,
    /// Total tokens consumed.
    pub tokens: u64,
    /// Distinct models used.
    pub models: u64,
    /// Human-readable window (e.g. `"24h"`).
    pub since: String,
    /// Unix timestamp.
    pub timestamp: i64,
}

/// Current Unix timestamp for wire messages.
#[must_use]
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
