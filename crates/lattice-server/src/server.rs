//! `LatticeServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use lattice_core::jobs::{Job, JobController, StatusSource, UsageSource};
use lattice_graph::GraphBuilder;
use lattice_logging::batcher::RoutedBatch;
use lattice_logging::{BatchSlot, ClientLogLayer, LogLevel};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::producers;
use crate::shutdown::{ServerState, ShutdownCoordinator, StateCell};
use crate::websocket::dispatch::DispatchWorker;
use crate::websocket::handlers::HandlerContext;
use crate::websocket::hub::Hub;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// External collaborators wired into the hub.
///
/// Only the graph builder is mandatory; a server without a scheduler or
/// usage tracker simply runs without those broadcasts.
pub struct Collaborators {
    /// The query engine boundary.
    pub builder: Arc<dyn GraphBuilder>,
    /// Scheduler control boundary.
    pub jobs: Option<Arc<dyn JobController>>,
    /// Scheduler status snapshots for the status broadcaster.
    pub status: Option<Arc<dyn StatusSource>>,
    /// Usage snapshots for the usage broadcaster.
    pub usage: Option<Arc<dyn UsageSource>>,
    /// Job update feed from the scheduler.
    pub job_feed: Option<broadcast::Receiver<Job>>,
}

impl Collaborators {
    /// Collaborators with only the mandatory graph builder.
    #[must_use]
    pub fn new(builder: Arc<dyn GraphBuilder>) -> Self {
        Self {
            builder,
            jobs: None,
            status: None,
            usage: None,
            job_feed: None,
        }
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub.
    pub hub: Arc<Hub>,
    /// Inbound handler context.
    pub ctx: Arc<HandlerContext>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Lifecycle state.
    pub state: Arc<StateCell>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// Tasks and feeds consumed exactly once by `listen()`.
struct PendingTasks {
    worker: DispatchWorker,
    log_rx: mpsc::UnboundedReceiver<RoutedBatch>,
    status: Option<Arc<dyn StatusSource>>,
    usage: Option<Arc<dyn UsageSource>>,
    job_feed: Option<broadcast::Receiver<Job>>,
}

/// The main Lattice server.
pub struct LatticeServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<StateCell>,
    shutdown: Arc<ShutdownCoordinator>,
    hub: Arc<Hub>,
    ctx: Arc<HandlerContext>,
    log_slot: Arc<BatchSlot>,
    log_tx: mpsc::UnboundedSender<RoutedBatch>,
    pending: Mutex<Option<PendingTasks>>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl LatticeServer {
    /// Create a new server. Fails only at construction; see `listen()`.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        collaborators: Collaborators,
        metrics: PrometheusHandle,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let state = Arc::new(StateCell::new());
        let (hub, worker) = Hub::new(registry.clone(), state.clone(), config.intent_queue_capacity);

        let log_slot = Arc::new(BatchSlot::new());
        let (log_tx, log_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(HandlerContext::new(
            hub.clone(),
            collaborators.builder,
            collaborators.jobs,
            config.default_graph_limit,
            log_slot.clone(),
        ));

        Self {
            config,
            registry,
            state,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            hub,
            ctx,
            log_slot,
            log_tx,
            pending: Mutex::new(Some(PendingTasks {
                worker,
                log_rx,
                status: collaborators.status,
                usage: collaborators.usage,
                job_feed: collaborators.job_feed,
            })),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// The hub, for producers outside this crate.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// A `tracing` layer that streams captured query logs to clients.
    /// Register it in the process subscriber next to the fmt layer.
    #[must_use]
    pub fn log_layer(&self, min_level: LogLevel) -> ClientLogLayer {
        ClientLogLayer::new(self.log_slot.clone(), min_level, self.log_tx.clone())
    }

    /// Build the Axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            state: self.state.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the dispatch worker, the background producers, and the HTTP
    /// listener. Returns the bound address and the serve task handle.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        let cancel = self.shutdown.token();
        self.shutdown
            .track(tokio::spawn(pending.worker.run(cancel.clone())));
        self.shutdown.track(producers::start_log_bridge(
            self.hub.clone(),
            pending.log_rx,
            cancel.clone(),
        ));
        if let Some(feed) = pending.job_feed {
            self.shutdown.track(producers::start_job_bridge(
                self.hub.clone(),
                feed,
                self.state.clone(),
                cancel.clone(),
            ));
        }
        if let Some(status) = pending.status {
            self.shutdown.track(producers::start_status_broadcaster(
                self.hub.clone(),
                status,
                self.state.clone(),
                cancel.clone(),
            ));
        }
        if let Some(usage) = pending.usage {
            self.shutdown.track(producers::start_usage_broadcaster(
                self.hub.clone(),
                usage,
                self.state.clone(),
                std::time::Duration::from_millis(self.config.usage_interval_ms),
                cancel.clone(),
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(addr = %local_addr, "server listening");

        let app = self.router();
        let serve_cancel = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
                .await;
        });

        Ok((local_addr, handle))
    }

    /// Graceful shutdown: drain, close connections, stop all tasks.
    ///
    /// Sequencing: admission and producers stop first (`Draining`), then
    /// every connection is closed so its loops unblock, then the
    /// cancellation token stops the remaining tasks within the grace
    /// period.
    pub async fn stop(&self) {
        info!("initiating server shutdown");
        self.state.advance(ServerState::Draining);

        let connections = self.registry.snapshot();
        if !connections.is_empty() {
            info!(count = connections.len(), "closing client connections");
            for conn in connections {
                if self.registry.unregister(&conn.id) {
                    let _ = conn.close();
                }
            }
        }

        let clean = self
            .shutdown
            .graceful_shutdown(Some(self.config.shutdown_timeout()))
            .await;
        if clean {
            info!("all tasks stopped cleanly");
        }

        self.hub.clear_cached();
        self.state.advance(ServerState::Stopped);
        info!(
            broadcast_drops = self.registry.drop_count(),
            "server shutdown complete"
        );
    }
}

/// GET /ws — WebSocket upgrade into a session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_message_size = state.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        state.state.get().as_str(),
        registry.len(),
        registry.drop_count(),
    ))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
