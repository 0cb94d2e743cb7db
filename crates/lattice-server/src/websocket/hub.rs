//! The hub: the single intent-submission API in front of the dispatch
//! worker.
//!
//! Any producer (query handler, job bridge, status ticker, log bridge)
//! submits intents here from any task; the hub never touches a mailbox
//! itself. Submission is non-blocking: a full intent queue is a
//! warn-and-drop (losing one broadcast beats blocking a scheduler tick),
//! and a closed queue during shutdown is a silent discard.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use lattice_core::ids::ConnectionId;
use lattice_core::messages::ServerMessage;
use lattice_graph::Graph;
use lattice_logging::LogBatch;

use crate::metrics::HUB_INTENTS_DROPPED_TOTAL;
use crate::shutdown::StateCell;

use super::connection::ClientConnection;
use super::dispatch::DispatchWorker;
use super::registry::ConnectionRegistry;

/// A request consumed exactly once by the dispatch worker.
#[derive(Debug)]
pub enum DispatchIntent {
    /// Fan a graph out to every registered connection.
    BroadcastGraph(Arc<Graph>),
    /// Fan a generic message out to every registered connection.
    BroadcastEvent(Arc<ServerMessage>),
    /// Send a graph to one connection.
    SendGraph {
        /// Recipient.
        to: ConnectionId,
        /// Payload.
        graph: Arc<Graph>,
    },
    /// Send a generic message to one connection.
    SendEvent {
        /// Recipient.
        to: ConnectionId,
        /// Payload.
        event: Arc<ServerMessage>,
    },
    /// Send a log batch to one connection.
    SendLogs {
        /// Recipient.
        to: ConnectionId,
        /// Payload.
        batch: Arc<LogBatch>,
    },
    /// Close one connection (idempotent with worker-side eviction).
    Close(ConnectionId),
}

impl DispatchIntent {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BroadcastGraph(_) => "broadcast_graph",
            Self::BroadcastEvent(_) => "broadcast_event",
            Self::SendGraph { .. } => "send_graph",
            Self::SendEvent { .. } => "send_event",
            Self::SendLogs { .. } => "send_logs",
            Self::Close(_) => "close",
        }
    }
}

/// The hub. Cheap to clone via `Arc`; all methods are non-blocking.
pub struct Hub {
    intent_tx: mpsc::Sender<DispatchIntent>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<StateCell>,
    last_graph: Mutex<Option<Arc<Graph>>>,
}

impl Hub {
    /// Create the hub and its dispatch worker. The worker must be spawned
    /// (and run until cancellation) for any intent to be delivered.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        state: Arc<StateCell>,
        intent_queue_capacity: usize,
    ) -> (Arc<Self>, DispatchWorker) {
        let (intent_tx, intent_rx) = mpsc::channel(intent_queue_capacity);
        let hub = Arc::new(Self {
            intent_tx,
            registry: registry.clone(),
            state,
            last_graph: Mutex::new(None),
        });
        (hub, DispatchWorker::new(intent_rx, registry))
    }

    /// The registry backing this hub.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Admit a new connection.
    ///
    /// Returns `false` when the server is not running or the ceiling is
    /// reached; the caller must close the transport without admitting it.
    /// On success the cached last graph is replayed as a targeted send so
    /// the new consumer gets current state without re-running the query.
    pub fn connect(&self, conn: Arc<ClientConnection>) -> bool {
        if !self.state.is_running() {
            debug!(conn_id = %conn.id, "rejecting connection, server not running");
            return false;
        }
        let id = conn.id.clone();
        if !self.registry.register(conn) {
            warn!(
                conn_id = %id,
                max_connections = self.registry.capacity(),
                "max clients reached, rejecting connection"
            );
            return false;
        }

        let cached = self.last_graph.lock().clone();
        if let Some(graph) = cached {
            debug!(
                conn_id = %id,
                nodes = graph.nodes.len(),
                "replaying cached graph to new client"
            );
            let _ = self.submit(DispatchIntent::SendGraph { to: id, graph });
        }
        true
    }

    /// Disconnect a connection: unregister via a close intent.
    ///
    /// Idempotent with worker-side eviction. If the worker is already gone
    /// (shutdown), the teardown happens inline instead.
    pub fn disconnect(&self, id: &ConnectionId) {
        if self.submit(DispatchIntent::Close(id.clone())) {
            return;
        }
        // Worker gone — close directly; the single-writer invariant is
        // moot once dispatch has stopped.
        if let Some(conn) = self.registry.get(id) {
            if self.registry.unregister(id) {
                let _ = conn.close();
            }
        }
    }

    /// Broadcast a graph to all connections, caching it for reconnects.
    pub fn broadcast_graph(&self, graph: impl Into<Arc<Graph>>) {
        let graph = graph.into();
        *self.last_graph.lock() = Some(graph.clone());
        let _ = self.submit(DispatchIntent::BroadcastGraph(graph));
    }

    /// Broadcast a generic message to all connections.
    pub fn broadcast_message(&self, message: ServerMessage) {
        let _ = self.submit(DispatchIntent::BroadcastEvent(Arc::new(message)));
    }

    /// Send a graph to one connection.
    pub fn send_graph(&self, to: ConnectionId, graph: impl Into<Arc<Graph>>) {
        let _ = self.submit(DispatchIntent::SendGraph {
            to,
            graph: graph.into(),
        });
    }

    /// Send a generic message to one connection.
    pub fn send_message(&self, to: ConnectionId, message: ServerMessage) {
        let _ = self.submit(DispatchIntent::SendEvent {
            to,
            event: Arc::new(message),
        });
    }

    /// Send a log batch to one connection.
    pub fn send_logs(&self, to: ConnectionId, batch: impl Into<Arc<LogBatch>>) {
        let _ = self.submit(DispatchIntent::SendLogs {
            to,
            batch: batch.into(),
        });
    }

    /// The most recently broadcast graph, if any.
    #[must_use]
    pub fn cached_graph(&self) -> Option<Arc<Graph>> {
        self.last_graph.lock().clone()
    }

    /// Clear the cached graph (server shutdown).
    pub fn clear_cached(&self) {
        *self.last_graph.lock() = None;
    }

    fn submit(&self, intent: DispatchIntent) -> bool {
        let kind = intent.kind();
        match self.intent_tx.try_send(intent) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!(HUB_INTENTS_DROPPED_TOTAL).increment(1);
                warn!(kind, "intent queue full, dropping dispatch intent");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Shutdown race: the worker has exited. Discard quietly.
                debug!(kind, "intent queue closed, discarding dispatch intent");
                false
            }
        }
    }
}
