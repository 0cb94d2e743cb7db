//! Background producers feeding the hub.
//!
//! Every producer observes the cancellation token and the server state:
//! once the server leaves `Running`, producers stop submitting intents.
//! All delivery goes through the hub's intent API; producers never touch
//! a mailbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lattice_core::ids::ConnectionId;
use lattice_core::jobs::{BudgetSnapshot, Job, QueueStats, StatusSource, UsageSource};
use lattice_core::messages::{now_ts, DaemonStatus, ServerMessage, UsageUpdate};
use lattice_logging::batcher::RoutedBatch;

use crate::shutdown::StateCell;
use crate::websocket::hub::Hub;

/// Worker slots assumed by the load heuristic.
const MAX_WORKERS: u64 = 1;

/// Trailing window for usage statistics.
const USAGE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Activity level of the scheduler, driving the adaptive poll interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityState {
    /// No jobs, no recent activity.
    Idle,
    /// Jobs running or queued.
    Active,
    /// High load.
    Busy,
}

/// Load heuristic: active jobs over worker slots, capped at 100.
#[must_use]
pub fn load_percent(stats: QueueStats) -> f64 {
    let active = stats.running + stats.queued;
    #[allow(clippy::cast_precision_loss)]
    let load = active as f64 / MAX_WORKERS as f64 * 100.0;
    load.min(100.0)
}

/// Classify scheduler activity for adaptive polling.
#[must_use]
pub fn detect_activity(stats: QueueStats) -> ActivityState {
    if stats.running > 5 || load_percent(stats) > 60.0 {
        return ActivityState::Busy;
    }
    if stats.running > 0 || stats.queued > 0 {
        return ActivityState::Active;
    }
    ActivityState::Idle
}

/// Poll interval for an activity level: fast when busy, slow when idle.
#[must_use]
pub fn interval_for(state: ActivityState) -> Duration {
    match state {
        ActivityState::Busy => Duration::from_secs(1),
        ActivityState::Active => Duration::from_secs(5),
        ActivityState::Idle => Duration::from_secs(30),
    }
}

/// Last broadcast status, for change detection.
#[derive(Clone, Copy, Debug)]
struct StatusSnapshot {
    active_jobs: u64,
    queued_jobs: u64,
    load_percent: f64,
    daily: f64,
    weekly: f64,
    monthly: f64,
}

impl StatusSnapshot {
    fn new(stats: QueueStats, budget: &BudgetSnapshot) -> Self {
        Self {
            active_jobs: stats.running + stats.queued,
            queued_jobs: stats.queued,
            load_percent: load_percent(stats),
            daily: budget.daily,
            weekly: budget.weekly,
            monthly: budget.monthly,
        }
    }

    /// Meaningful change since `prev`: any count change, >1% load
    /// movement, or >1¢ budget movement.
    fn changed_from(&self, prev: &Self) -> bool {
        self.active_jobs != prev.active_jobs
            || self.queued_jobs != prev.queued_jobs
            || (self.load_percent - prev.load_percent).abs() > 1.0
            || (self.daily - prev.daily).abs() > 0.01
            || (self.weekly - prev.weekly).abs() > 0.01
            || (self.monthly - prev.monthly).abs() > 0.01
    }
}

fn fresh_interval(period: Duration) -> tokio::time::Interval {
    // Skip the interval's immediate first tick by starting one period out.
    tokio::time::interval_at(tokio::time::Instant::now() + period, period)
}

/// Relay scheduler job updates from the broadcast feed to all clients.
///
/// A lagged receiver logs and keeps going — job updates are best-effort.
pub fn start_job_bridge(
    hub: Arc<Hub>,
    mut feed: broadcast::Receiver<Job>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("job bridge stopping on cancellation");
                    break;
                }
                result = feed.recv() => match result {
                    Ok(job) => {
                        if !state.is_running() {
                            continue;
                        }
                        debug!(
                            job_id = %job.id,
                            status = ?job.status,
                            progress = %format!("{}/{}", job.progress.current, job.progress.total),
                            "broadcasting job update"
                        );
                        hub.broadcast_message(ServerMessage::JobUpdate {
                            job,
                            timestamp: now_ts(),
                            initial: None,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "job bridge lagged behind the feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("job feed closed, job bridge exiting");
                        break;
                    }
                }
            }
        }
    })
}

/// Periodically broadcast scheduler status with adaptive polling: fast
/// updates when busy, slow when idle. Skips ticks with no clients and
/// ticks where nothing meaningfully changed.
pub fn start_status_broadcaster(
    hub: Arc<Hub>,
    source: Arc<dyn StatusSource>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut activity = ActivityState::Idle;
        let mut ticker = fresh_interval(interval_for(activity));
        let mut last: Option<StatusSnapshot> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("status broadcaster stopping on cancellation");
                    break;
                }
                _ = ticker.tick() => {
                    if !state.is_running() {
                        continue;
                    }
                    if hub.registry().is_empty() {
                        continue;
                    }

                    let stats = source.queue_stats();
                    let detected = detect_activity(stats);
                    if detected != activity {
                        activity = detected;
                        ticker = fresh_interval(interval_for(activity));
                        debug!(
                            state = ?activity,
                            interval_secs = interval_for(activity).as_secs(),
                            "scheduler activity changed, adjusted poll interval"
                        );
                    }

                    let budget = source.budget();
                    let snapshot = StatusSnapshot::new(stats, &budget);
                    if last.as_ref().is_some_and(|prev| !snapshot.changed_from(prev)) {
                        continue;
                    }
                    last = Some(snapshot);

                    hub.broadcast_message(ServerMessage::DaemonStatus(DaemonStatus {
                        running: source.running(),
                        active_jobs: snapshot.active_jobs,
                        queued_jobs: snapshot.queued_jobs,
                        load_percent: snapshot.load_percent,
                        budget_daily: budget.daily,
                        budget_weekly: budget.weekly,
                        budget_monthly: budget.monthly,
                        budget_daily_limit: budget.daily_limit,
                        budget_weekly_limit: budget.weekly_limit,
                        budget_monthly_limit: budget.monthly_limit,
                        server_state: state.get().as_str().into(),
                        timestamp: now_ts(),
                    }));
                }
            }
        }
    })
}

/// Periodically broadcast usage statistics, skipping unchanged ticks.
pub fn start_usage_broadcaster(
    hub: Arc<Hub>,
    source: Arc<dyn UsageSource>,
    state: Arc<StateCell>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = fresh_interval(interval);
        let mut last: Option<UsageUpdate> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("usage broadcaster stopping on cancellation");
                    break;
                }
                _ = ticker.tick() => {
                    if !state.is_running() {
                        continue;
                    }
                    if hub.registry().is_empty() {
                        continue;
                    }
                    let Some(usage) = source.usage_since(USAGE_WINDOW) else {
                        continue; // Tracker unavailable; silent skip.
                    };
                    if last.as_ref().is_some_and(|prev| !usage_changed(prev, &usage)) {
                        continue;
                    }
                    last = Some(usage.clone());
                    hub.broadcast_message(ServerMessage::UsageUpdate(usage));
                }
            }
        }
    })
}

/// Usage stats change infrequently; any field movement broadcasts.
fn usage_changed(prev: &UsageUpdate, next: &UsageUpdate) -> bool {
    prev.total_cost != next.total_cost
        || prev.requests != next.requests
        || prev.success != next.success
        || prev.tokens != next.tokens
        || prev.models != next.models
}

/// Forward flushed log batches to their issuing connections.
pub fn start_log_bridge(
    hub: Arc<Hub>,
    mut batches: mpsc::UnboundedReceiver<RoutedBatch>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("log bridge stopping on cancellation");
                    break;
                }
                routed = batches.recv() => match routed {
                    Some((conn_id, batch)) => {
                        hub.send_logs(ConnectionId::from_string(conn_id), batch);
                    }
                    None => break,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::ids::JobId;
    use lattice_core::jobs::{JobProgress, JobStatus};

    use crate::shutdown::ServerState;
    use crate::websocket::connection::{ClientConnection, MailboxReceivers};
    use crate::websocket::registry::ConnectionRegistry;

    fn start_hub() -> (Arc<Hub>, Arc<StateCell>, CancellationToken) {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let state = Arc::new(StateCell::new());
        let (hub, worker) = Hub::new(registry, state.clone(), 64);
        let cancel = CancellationToken::new();
        let _ = tokio::spawn(worker.run(cancel.clone()));
        (hub, state, cancel)
    }

    fn connect(hub: &Arc<Hub>, id: &str) -> (Arc<ClientConnection>, MailboxReceivers) {
        let (conn, rx) = ClientConnection::new(
            lattice_core::ids::ConnectionId::from_string(id.into()),
            16,
        );
        let conn = Arc::new(conn);
        assert!(hub.connect(conn.clone()));
        (conn, rx)
    }

    fn sample_job(id: &str) -> Job {
        Job {
            id: JobId::from_string(id.into()),
            description: "ingest".into(),
            status: JobStatus::Running,
            progress: JobProgress {
                current: 1,
                total: 4,
            },
            error: None,
            updated_at: 0,
        }
    }

    struct FixedStatus {
        stats: QueueStats,
    }

    impl StatusSource for FixedStatus {
        fn running(&self) -> bool {
            true
        }
        fn queue_stats(&self) -> QueueStats {
            self.stats
        }
        fn budget(&self) -> BudgetSnapshot {
            BudgetSnapshot {
                daily: 0.5,
                daily_limit: 5.0,
                ..BudgetSnapshot::default()
            }
        }
    }

    struct FixedUsage;

    impl UsageSource for FixedUsage {
        fn usage_since(&self, _window: Duration) -> Option<UsageUpdate> {
            Some(UsageUpdate {
                total_cost: 1.25,
                requests: 10,
                success: 9,
                tokens: 5000,
                models: 2,
                since: "24h".into(),
                timestamp: 0,
            })
        }
    }

    #[test]
    fn activity_detection_thresholds() {
        assert_eq!(
            detect_activity(QueueStats {
                running: 0,
                queued: 0
            }),
            ActivityState::Idle
        );
        assert_eq!(
            detect_activity(QueueStats {
                running: 1,
                queued: 0
            }),
            ActivityState::Busy // 1 active job over 1 worker = 100% load
        );
        assert_eq!(
            detect_activity(QueueStats {
                running: 6,
                queued: 0
            }),
            ActivityState::Busy
        );
    }

    #[test]
    fn load_capped_at_hundred() {
        let load = load_percent(QueueStats {
            running: 10,
            queued: 10,
        });
        assert!((load - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn intervals_scale_with_activity() {
        assert!(interval_for(ActivityState::Busy) < interval_for(ActivityState::Active));
        assert!(interval_for(ActivityState::Active) < interval_for(ActivityState::Idle));
    }

    #[test]
    fn status_change_detection_tolerances() {
        let base = StatusSnapshot {
            active_jobs: 2,
            queued_jobs: 1,
            load_percent: 50.0,
            daily: 1.0,
            weekly: 2.0,
            monthly: 3.0,
        };
        assert!(!base.changed_from(&base));

        // Sub-tolerance movements do not count as change.
        let mut wiggle = base;
        wiggle.load_percent = 50.5;
        wiggle.daily = 1.005;
        assert!(!wiggle.changed_from(&base));

        let mut jumped = base;
        jumped.active_jobs = 3;
        assert!(jumped.changed_from(&base));

        let mut spent = base;
        spent.monthly = 3.02;
        assert!(spent.changed_from(&base));
    }

    #[tokio::test]
    async fn job_bridge_relays_updates() {
        let (hub, state, cancel) = start_hub();
        let (_conn, mut rx) = connect(&hub, "conn_1");

        let (feed_tx, feed_rx) = broadcast::channel(16);
        let handle = start_job_bridge(hub, feed_rx, state, cancel.clone());

        let _ = feed_tx.send(sample_job("job_1")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = rx.event_rx.try_recv().unwrap();
        assert!(matches!(&*msg, ServerMessage::JobUpdate { .. }));

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn job_bridge_stops_submitting_when_draining() {
        let (hub, state, cancel) = start_hub();
        let (_conn, mut rx) = connect(&hub, "conn_1");
        state.advance(ServerState::Draining);

        let (feed_tx, feed_rx) = broadcast::channel(16);
        let handle = start_job_bridge(hub, feed_rx, state, cancel.clone());

        let _ = feed_tx.send(sample_job("job_1")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.event_rx.try_recv().is_err());
        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn job_bridge_exits_when_feed_closes() {
        let (hub, state, cancel) = start_hub();
        let (feed_tx, feed_rx) = broadcast::channel(16);
        let handle = start_job_bridge(hub, feed_rx, state, cancel);

        drop(feed_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge should exit when the feed closes")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_broadcaster_emits_then_suppresses_unchanged() {
        let (hub, state, cancel) = start_hub();
        let (_conn, mut rx) = connect(&hub, "conn_1");

        let source = Arc::new(FixedStatus {
            stats: QueueStats {
                running: 0,
                queued: 0,
            },
        });
        let handle = start_status_broadcaster(hub, source, state, cancel.clone());

        // First idle tick (30s) broadcasts.
        tokio::time::sleep(Duration::from_secs(31)).await;
        let msg = rx.event_rx.try_recv().unwrap();
        match &*msg {
            ServerMessage::DaemonStatus(status) => {
                assert!(status.running);
                assert_eq!(status.active_jobs, 0);
                assert_eq!(status.server_state, "running");
            }
            other => panic!("expected daemon status, got {other:?}"),
        }

        // Second tick with identical stats is suppressed.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.event_rx.try_recv().is_err());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_broadcaster_skips_without_clients() {
        let (hub, state, cancel) = start_hub();
        let source = Arc::new(FixedStatus {
            stats: QueueStats {
                running: 2,
                queued: 0,
            },
        });
        let handle = start_status_broadcaster(hub.clone(), source, state, cancel.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        // No clients: nothing observable, and no panic.
        assert!(hub.registry().is_empty());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn usage_broadcaster_emits_once_for_stable_stats() {
        let (hub, state, cancel) = start_hub();
        let (_conn, mut rx) = connect(&hub, "conn_1");

        let handle = start_usage_broadcaster(
            hub,
            Arc::new(FixedUsage),
            state,
            Duration::from_millis(500),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        let msg = rx.event_rx.try_recv().unwrap();
        match &*msg {
            ServerMessage::UsageUpdate(usage) => assert_eq!(usage.requests, 10),
            other => panic!("expected usage update, got {other:?}"),
        }

        // Stats unchanged: later ticks stay quiet.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.event_rx.try_recv().is_err());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn log_bridge_routes_to_issuer() {
        let (hub, _state, cancel) = start_hub();
        let (conn, mut rx) = connect(&hub, "conn_1");

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let handle = start_log_bridge(hub, batch_rx, cancel.clone());

        let batch = lattice_logging::LogBatch {
            query_id: "q_1".into(),
            messages: vec![],
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        batch_tx.send((conn.id.as_str().to_owned(), batch)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.log_rx.try_recv().is_ok());
        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn producers_exit_promptly_on_cancellation() {
        let (hub, state, cancel) = start_hub();
        let (_feed_tx, feed_rx) = broadcast::channel::<Job>(4);
        let (_batch_tx, batch_rx) = mpsc::unbounded_channel();

        let handles = vec![
            start_job_bridge(hub.clone(), feed_rx, state.clone(), cancel.clone()),
            start_status_broadcaster(
                hub.clone(),
                Arc::new(FixedStatus {
                    stats: QueueStats::default(),
                }),
                state.clone(),
                cancel.clone(),
            ),
            start_usage_broadcaster(
                hub.clone(),
                Arc::new(FixedUsage),
                state,
                Duration::from_millis(500),
                cancel.clone(),
            ),
            start_log_bridge(hub, batch_rx, cancel.clone()),
        ];

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("producer should exit promptly")
                .unwrap();
        }
    }
}
