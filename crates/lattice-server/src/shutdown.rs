//! Lifecycle state and graceful shutdown coordination.
//!
//! [`ServerState`] moves forward only: `Running → Draining → Stopped`.
//! Admission checks it before accepting connections; background producers
//! check it before submitting intents. [`ShutdownCoordinator`] owns the
//! root `CancellationToken` and the handles of every background task, so
//! shutdown can prove all of them exited.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default grace period before giving up on stuck tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Server lifecycle state; transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ServerState {
    /// Normal operation.
    Running = 0,
    /// Graceful shutdown in progress; no new connections or broadcasts.
    Draining = 1,
    /// Shutdown complete.
    Stopped = 2,
}

impl ServerState {
    /// Wire/log name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Atomically shared lifecycle state.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in `Running`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Whether the server is accepting work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.get() == ServerState::Running
    }

    /// Advance to `state`. Transitions never move backward; an attempt to
    /// regress is a no-op.
    pub fn advance(&self, state: ServerState) {
        let prev = self.0.fetch_max(state as u8, Ordering::AcqRel);
        if prev < state as u8 {
            info!(new_state = state.as_str(), "server state changed");
        }
    }
}

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a background task for shutdown accounting.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.handles.lock().push(handle);
    }

    /// Number of tracked tasks (finished or not).
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.handles.lock().len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and wait up to `timeout` for every tracked task.
    ///
    /// Returns `true` if all tasks exited within the grace period.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
