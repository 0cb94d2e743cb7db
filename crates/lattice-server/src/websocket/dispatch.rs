//! The dispatch worker: the single writer for every mailbox.
//!
//! All fan-out and targeted sends submitted by arbitrary producers are
//! serialized through one task. Because only this task enqueues into or
//! closes mailboxes, a send can never race a close — the whole
//! close-after-send panic class is gone by construction, not by locking.
//!
//! A full mailbox at send time marks the consumer as slow: it is removed
//! from the registry and closed rather than ever blocking the worker.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

use super::connection::{ClientConnection, SendOutcome};
use super::hub::DispatchIntent;
use super::registry::ConnectionRegistry;

/// Consumes dispatch intents strictly sequentially.
pub struct DispatchWorker {
    intent_rx: mpsc::Receiver<DispatchIntent>,
    registry: Arc<ConnectionRegistry>,
}

impl DispatchWorker {
    pub(super) fn new(
        intent_rx: mpsc::Receiver<DispatchIntent>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            intent_rx,
            registry,
        }
    }

    /// Run until cancellation or until every hub handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("dispatch worker stopping on cancellation");
                    break;
                }
                intent = self.intent_rx.recv() => {
                    match intent {
                        Some(intent) => self.handle(intent),
                        None => {
                            debug!("dispatch worker stopping, all submitters dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, intent: DispatchIntent) {
        match intent {
            DispatchIntent::BroadcastGraph(graph) => {
                let delivered = self.fan_out(|conn| conn.send_graph(graph.clone()));
                debug!(
                    delivered,
                    nodes = graph.nodes.len(),
                    links = graph.links.len(),
                    "broadcast graph"
                );
            }
            DispatchIntent::BroadcastEvent(event) => {
                let delivered = self.fan_out(|conn| conn.send_event(event.clone()));
                debug!(delivered, "broadcast message");
            }
            DispatchIntent::SendGraph { to, graph } => {
                self.targeted(&to, |conn| conn.send_graph(graph));
            }
            DispatchIntent::SendEvent { to, event } => {
                self.targeted(&to, |conn| conn.send_event(event));
            }
            DispatchIntent::SendLogs { to, batch } => {
                self.targeted(&to, |conn| conn.send_logs(batch));
            }
            DispatchIntent::Close(id) => {
                if let Some(conn) = self.registry.get(&id) {
                    let _ = self.registry.unregister(&id);
                    let _ = conn.close();
                }
            }
        }
    }

    /// Non-blocking enqueue across a registry snapshot. Returns the number
    /// of connections that accepted the payload.
    fn fan_out(&self, send: impl Fn(&ClientConnection) -> SendOutcome) -> usize {
        let mut delivered = 0;
        for conn in self.registry.snapshot() {
            match send(&conn) {
                SendOutcome::Queued => delivered += 1,
                SendOutcome::Full => self.evict(&conn),
                SendOutcome::Closed => {
                    let _ = self.registry.unregister(&conn.id);
                }
            }
        }
        delivered
    }

    /// Non-blocking enqueue to one connection; a miss (already gone) is
    /// silently ignored.
    fn targeted(&self, to: &lattice_core::ids::ConnectionId, send: impl FnOnce(&ClientConnection) -> SendOutcome) {
        let Some(conn) = self.registry.get(to) else {
            return;
        };
        match send(&conn) {
            SendOutcome::Queued => {}
            SendOutcome::Full => self.evict(&conn),
            SendOutcome::Closed => {
                let _ = self.registry.unregister(&conn.id);
            }
        }
    }

    /// Remove a slow consumer. Runs on the worker task, so closing here
    /// upholds the single-writer invariant.
    fn evict(&self, conn: &Arc<ClientConnection>) {
        if !self.registry.unregister(&conn.id) {
            return; // Already removed.
        }
        let _ = conn.close();
        let conn_drops = conn.note_drop();
        let total_drops = self.registry.record_drop();
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        warn!(
            conn_id = %conn.id,
            conn_drops,
            total_drops,
            "client mailbox full, evicting slow consumer"
        );
    }
}
