//! Inbound message handlers.
//!
//! Each handler may submit dispatch intents through the hub; none of them
//! touches a mailbox or the registry directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use lattice_core::ids::{ConnectionId, JobId, QueryId};
use lattice_core::jobs::JobController;
use lattice_core::messages::{now_ts, ServerMessage};
use lattice_graph::builder::error_graph;
use lattice_graph::{Graph, GraphBuilder};
use lattice_logging::batcher::RoutedBatch;
use lattice_logging::BatchSlot;

use crate::metrics::QUERIES_TOTAL;

use super::connection::ClientConnection;
use super::hub::Hub;
use super::messages::{ClientMessage, JobAction, VisibilityAction};

/// Graph limits outside this range are ignored.
const MAX_GRAPH_LIMIT: u32 = 100_000;

/// Shared context for all inbound handlers.
pub struct HandlerContext {
    /// The hub intents are submitted through.
    pub hub: Arc<Hub>,
    /// The query engine boundary.
    pub builder: Arc<dyn GraphBuilder>,
    /// The scheduler boundary, when one is wired.
    pub jobs: Option<Arc<dyn JobController>>,
    /// Node limit applied to queries.
    pub graph_limit: AtomicU32,
    /// Per-query log capture slot.
    pub log_slot: Arc<BatchSlot>,
}

impl HandlerContext {
    /// Create a handler context.
    #[must_use]
    pub fn new(
        hub: Arc<Hub>,
        builder: Arc<dyn GraphBuilder>,
        jobs: Option<Arc<dyn JobController>>,
        default_graph_limit: u32,
        log_slot: Arc<BatchSlot>,
    ) -> Self {
        Self {
            hub,
            builder,
            jobs,
            graph_limit: AtomicU32::new(default_graph_limit),
            log_slot,
        }
    }
}

/// Dispatch one parsed inbound message.
pub async fn route_message(ctx: &HandlerContext, conn: &Arc<ClientConnection>, msg: ClientMessage) {
    match msg {
        ClientMessage::Query { query } => handle_query(ctx, conn, &query).await,
        ClientMessage::Clear => handle_clear(ctx, conn),
        ClientMessage::Ping => {} // Liveness handled at the frame layer.
        ClientMessage::SetGraphLimit { limit } => handle_set_graph_limit(ctx, conn, limit),
        ClientMessage::Visibility {
            action,
            node_type,
            hidden,
        } => handle_visibility(ctx, conn, action, node_type, hidden).await,
        ClientMessage::JobControl { action, job_id } => {
            handle_job_control(ctx, conn, action, job_id).await;
        }
    }
}

/// Run a query and send the resulting graph to the issuing client.
///
/// Logs emitted while the query runs are captured into a batch and
/// streamed to the same client.
async fn handle_query(ctx: &HandlerContext, conn: &Arc<ClientConnection>, query: &str) {
    let query_id = QueryId::new();
    conn.set_last_query(query);
    counter!(QUERIES_TOTAL).increment(1);

    if let Some(pending) = ctx.log_slot.arm(conn.id.as_str(), query_id.as_str()) {
        deliver_batch(ctx, pending);
    }

    info!(
        query_id = %query_id,
        conn_id = %conn.id,
        query_len = query.len(),
        "processing query"
    );

    let limit = ctx.graph_limit.load(Ordering::Relaxed) as usize;
    let mut graph = match ctx.builder.build_from_query(query, limit).await {
        Ok(g) => {
            info!(
                query_id = %query_id,
                nodes = g.nodes.len(),
                links = g.links.len(),
                "query completed"
            );
            g
        }
        Err(err) => {
            warn!(query_id = %query_id, error = %err, "query failed");
            error_graph(&err)
        }
    };

    conn.view().apply(&mut graph);
    ctx.hub.send_graph(conn.id.clone(), graph);

    if let Some(batch) = ctx.log_slot.disarm() {
        deliver_batch(ctx, batch);
    }
}

/// Send an empty graph with a hint description.
fn handle_clear(ctx: &HandlerContext, conn: &Arc<ClientConnection>) {
    debug!(conn_id = %conn.id, "clearing graph");
    let graph = Graph::empty_with_description("Type a query to see the graph...");
    ctx.hub.send_graph(conn.id.clone(), graph);
}

/// Validate and store a new graph node limit.
fn handle_set_graph_limit(ctx: &HandlerContext, conn: &Arc<ClientConnection>, limit: u32) {
    if limit == 0 || limit > MAX_GRAPH_LIMIT {
        warn!(
            conn_id = %conn.id,
            requested_limit = limit,
            "invalid graph limit, ignoring"
        );
        return;
    }
    let old = ctx.graph_limit.swap(limit, Ordering::Relaxed);
    info!(
        conn_id = %conn.id,
        old_limit = old,
        new_limit = limit,
        "graph limit changed"
    );
}

/// Update the connection's view preferences, then re-render its last
/// query so the new visibility takes effect.
async fn handle_visibility(
    ctx: &HandlerContext,
    conn: &Arc<ClientConnection>,
    action: VisibilityAction,
    node_type: Option<String>,
    hidden: bool,
) {
    match action {
        VisibilityAction::ToggleNodeType => {
            let Some(node_type) = node_type else {
                warn!(conn_id = %conn.id, "visibility toggle without node_type, ignoring");
                return;
            };
            conn.view_mut().set_type_hidden(&node_type, hidden);
            debug!(conn_id = %conn.id, node_type = %node_type, hidden, "node type visibility changed");
        }
        VisibilityAction::ToggleIsolated => {
            conn.view_mut().set_hide_isolated(hidden);
            debug!(conn_id = %conn.id, hidden, "isolated node visibility changed");
        }
    }

    match conn.last_query() {
        Some(query) => handle_query(ctx, conn, &query).await,
        None => debug!(conn_id = %conn.id, "no query to re-run"),
    }
}

/// Forward a job control action to the scheduler boundary.
async fn handle_job_control(
    ctx: &HandlerContext,
    conn: &Arc<ClientConnection>,
    action: JobAction,
    job_id: String,
) {
    if job_id.is_empty() {
        warn!(conn_id = %conn.id, "job control without job id, ignoring");
        return;
    }
    let Some(jobs) = &ctx.jobs else {
        warn!(conn_id = %conn.id, job_id = %job_id, "scheduler unavailable, ignoring job control");
        return;
    };
    let id = JobId::from_string(job_id);

    let result = match action {
        JobAction::Pause => jobs.pause(&id, "user requested via UI").await,
        JobAction::Resume => jobs.resume(&id).await,
        JobAction::Details => match jobs.get(&id).await {
            Ok(job) => {
                ctx.hub.send_message(
                    conn.id.clone(),
                    ServerMessage::JobUpdate {
                        job,
                        timestamp: now_ts(),
                        initial: None,
                    },
                );
                return;
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => {
            info!(conn_id = %conn.id, job_id = %id, ?action, "job control applied");
            // Everyone watching the job list sees the state change.
            if let Ok(job) = jobs.get(&id).await {
                ctx.hub.broadcast_message(ServerMessage::JobUpdate {
                    job,
                    timestamp: now_ts(),
                    initial: None,
                });
            }
        }
        Err(err) => {
            warn!(conn_id = %conn.id, job_id = %id, ?action, error = %err, "job control failed");
        }
    }
}

fn deliver_batch(ctx: &HandlerContext, (conn_id, batch): RoutedBatch) {
    ctx.hub
        .send_logs(ConnectionId::from_string(conn_id), batch);
}
