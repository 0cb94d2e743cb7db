//! Per-connection state: mailboxes, view preferences, liveness, close flag.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lattice_core::ids::ConnectionId;
use lattice_core::messages::ServerMessage;
use lattice_graph::Graph;
use lattice_logging::LogBatch;

/// Result of a non-blocking mailbox enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload queued for the write loop.
    Queued,
    /// Mailbox full — the consumer is slow.
    Full,
    /// Mailbox receiver gone — the connection is closing.
    Closed,
}

/// Client-specific graph visibility preferences.
///
/// Mutated by the read loop on `visibility` messages and read by the query
/// handler; never touched by the dispatch worker.
#[derive(Debug, Default)]
pub struct ViewState {
    hidden_node_types: HashSet<String>,
    hide_isolated: bool,
}

impl ViewState {
    /// Hide or show a node type (stored lowercase).
    pub fn set_type_hidden(&mut self, node_type: &str, hidden: bool) {
        let key = node_type.trim().to_lowercase();
        if hidden {
            let _ = self.hidden_node_types.insert(key);
        } else {
            let _ = self.hidden_node_types.remove(&key);
        }
    }

    /// Hide or show nodes with no connections.
    pub fn set_hide_isolated(&mut self, hidden: bool) {
        self.hide_isolated = hidden;
    }

    /// Whether a node type is hidden.
    #[must_use]
    pub fn is_type_hidden(&self, node_type: &str) -> bool {
        self.hidden_node_types.contains(node_type)
    }

    /// Apply visibility rules to a graph in place.
    ///
    /// Nodes of a hidden type are marked invisible; isolated nodes are
    /// hidden when `hide_isolated` is set; a link is hidden unless both
    /// endpoints remain visible.
    pub fn apply(&self, g: &mut Graph) {
        let mut connection_count: HashMap<&str, usize> = HashMap::new();
        for link in &g.links {
            *connection_count.entry(link.source.as_str()).or_insert(0) += 1;
            *connection_count.entry(link.target.as_str()).or_insert(0) += 1;
        }

        let mut visible: HashSet<String> = HashSet::new();
        for node in &mut g.nodes {
            if self.hidden_node_types.contains(&node.node_type) {
                node.visible = false;
                continue;
            }
            if self.hide_isolated
                && connection_count.get(node.id.as_str()).copied().unwrap_or(0) == 0
            {
                node.visible = false;
                continue;
            }
            if node.visible {
                let _ = visible.insert(node.id.clone());
            }
        }

        for link in &mut g.links {
            link.hidden = !visible.contains(&link.source) || !visible.contains(&link.target);
        }
    }
}

/// Receive halves of a connection's three mailboxes, owned by the write
/// loop.
pub struct MailboxReceivers {
    /// Primary data payloads.
    pub graph_rx: mpsc::Receiver<Arc<Graph>>,
    /// Log batches.
    pub log_rx: mpsc::Receiver<Arc<LogBatch>>,
    /// Generic/control messages.
    pub event_rx: mpsc::Receiver<Arc<ServerMessage>>,
}

/// One connected consumer.
///
/// Referenced by exactly the read loop, the write loop, and the registry
/// entry. The send halves of the mailboxes live here; only the dispatch
/// worker calls the `send_*` methods after registration.
pub struct ClientConnection {
    /// Connection identifier (process-lifetime unique).
    pub id: ConnectionId,
    graph_tx: mpsc::Sender<Arc<Graph>>,
    log_tx: mpsc::Sender<Arc<LogBatch>>,
    event_tx: mpsc::Sender<Arc<ServerMessage>>,
    closed: AtomicBool,
    close_token: CancellationToken,
    view: RwLock<ViewState>,
    last_query: Mutex<Option<String>>,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped: AtomicU64,
    /// When this connection was established.
    pub connected_at: Instant,
}

impl ClientConnection {
    /// Create a connection with three bounded mailboxes of `capacity`.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, MailboxReceivers) {
        let (graph_tx, graph_rx) = mpsc::channel(capacity);
        let (log_tx, log_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let now = Instant::now();
        let conn = Self {
            id,
            graph_tx,
            log_tx,
            event_tx,
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            view: RwLock::new(ViewState::default()),
            last_query: Mutex::new(None),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped: AtomicU64::new(0),
            connected_at: now,
        };
        (
            conn,
            MailboxReceivers {
                graph_rx,
                log_rx,
                event_rx,
            },
        )
    }

    /// Enqueue a graph payload without blocking.
    pub fn send_graph(&self, graph: Arc<Graph>) -> SendOutcome {
        outcome(self.graph_tx.try_send(graph))
    }

    /// Enqueue a log batch without blocking.
    pub fn send_logs(&self, batch: Arc<LogBatch>) -> SendOutcome {
        outcome(self.log_tx.try_send(batch))
    }

    /// Enqueue a generic message without blocking.
    pub fn send_event(&self, event: Arc<ServerMessage>) -> SendOutcome {
        outcome(self.event_tx.try_send(event))
    }

    /// One-shot close: cancels the write loop. Returns `true` on the first
    /// call only; double-close is a no-op.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_token.cancel();
        true
    }

    /// Whether close has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Mark the connection as alive (Pong or client ping received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last Pong (or connection establishment).
    #[must_use]
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Record a dropped payload; returns this connection's new drop count.
    pub fn note_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Payloads dropped for this connection.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remember the last executed query for visibility re-renders.
    pub fn set_last_query(&self, query: &str) {
        *self.last_query.lock() = Some(query.to_owned());
    }

    /// The last executed query, if any.
    #[must_use]
    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().clone()
    }

    /// Read access to the view preferences.
    pub fn view(&self) -> parking_lot::RwLockReadGuard<'_, ViewState> {
        self.view.read()
    }

    /// Write access to the view preferences.
    pub fn view_mut(&self) -> parking_lot::RwLockWriteGuard<'_, ViewState> {
        self.view.write()
    }
}

fn outcome<T>(result: Result<(), mpsc::error::TrySendError<T>>) -> SendOutcome {
    match result {
        Ok(()) => SendOutcome::Queued,
        Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_graph::{Link, Node};

    fn make_connection(capacity: usize) -> (ClientConnection, MailboxReceivers) {
        ClientConnection::new(ConnectionId::from_string("conn_t".into()), capacity)
    }

    #[tokio::test]
    async fn send_graph_queued() {
        let (conn, mut rx) = make_connection(4);
        let g = Arc::new(Graph::empty());
        assert_eq!(conn.send_graph(g), SendOutcome::Queued);
        assert!(rx.graph_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_to_full_mailbox_reports_full() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.send_graph(Arc::new(Graph::empty())), SendOutcome::Queued);
        assert_eq!(conn.send_graph(Arc::new(Graph::empty())), SendOutcome::Full);
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_reports_closed() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert_eq!(
            conn.send_graph(Arc::new(Graph::empty())),
            SendOutcome::Closed
        );
    }

    #[test]
    fn close_is_one_shot() {
        let (conn, _rx) = make_connection(1);
        assert!(!conn.is_closed());
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert!(conn.close_token().is_cancelled());
    }

    #[test]
    fn concurrent_double_close_closes_once() {
        let (conn, _rx) = make_connection(1);
        let conn = std::sync::Arc::new(conn);
        let mut firsts = 0;
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let conn = conn.clone();
                    s.spawn(move || conn.close())
                })
                .collect();
            for h in handles {
                if h.join().unwrap() {
                    firsts += 1;
                }
            }
        });
        assert_eq!(firsts, 1);
    }

    #[test]
    fn mailbox_classes_are_independent() {
        let (conn, _rx) = make_connection(1);
        // Fill the graph mailbox; events still go through.
        assert_eq!(conn.send_graph(Arc::new(Graph::empty())), SendOutcome::Queued);
        assert_eq!(conn.send_graph(Arc::new(Graph::empty())), SendOutcome::Full);
        let msg = Arc::new(ServerMessage::Error {
            error: "e".into(),
        });
        assert_eq!(conn.send_event(msg), SendOutcome::Queued);
    }

    #[test]
    fn alive_check_resets_flag() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn drop_counter_increments() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.drop_count(), 0);
        assert_eq!(conn.note_drop(), 1);
        assert_eq!(conn.note_drop(), 2);
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn last_query_roundtrip() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.last_query().is_none());
        conn.set_last_query("show all");
        assert_eq!(conn.last_query().as_deref(), Some("show all"));
    }

    // ── ViewState ──

    fn sample_graph() -> Graph {
        let mut g = Graph::empty();
        g.nodes.push(Node::new("a", "person", "Alice"));
        g.nodes.push(Node::new("b", "company", "Initech"));
        g.nodes.push(Node::new("c", "person", "Carol")); // isolated
        g.links.push(Link::new("a", "b", "works_at"));
        g.update_stats();
        g
    }

    #[test]
    fn hidden_type_hides_nodes_and_links() {
        let mut view = ViewState::default();
        view.set_type_hidden("Company", true); // normalized to lowercase
        let mut g = sample_graph();
        view.apply(&mut g);

        assert!(g.nodes.iter().find(|n| n.id == "a").unwrap().visible);
        assert!(!g.nodes.iter().find(|n| n.id == "b").unwrap().visible);
        // Link to the hidden node is hidden too.
        assert!(g.links[0].hidden);
    }

    #[test]
    fn hide_isolated_hides_unconnected_nodes() {
        let mut view = ViewState::default();
        view.set_hide_isolated(true);
        let mut g = sample_graph();
        view.apply(&mut g);

        assert!(g.nodes.iter().find(|n| n.id == "a").unwrap().visible);
        assert!(!g.nodes.iter().find(|n| n.id == "c").unwrap().visible);
        assert!(!g.links[0].hidden);
    }

    #[test]
    fn unhiding_type_restores_visibility() {
        let mut view = ViewState::default();
        view.set_type_hidden("person", true);
        assert!(view.is_type_hidden("person"));
        view.set_type_hidden("person", false);
        assert!(!view.is_type_hidden("person"));

        let mut g = sample_graph();
        view.apply(&mut g);
        assert!(g.nodes.iter().all(|n| n.visible));
    }

    #[test]
    fn default_view_hides_nothing() {
        let view = ViewState::default();
        let mut g = sample_graph();
        view.apply(&mut g);
        assert!(g.nodes.iter().all(|n| n.visible));
        assert!(g.links.iter().all(|l| !l.hidden));
    }
}
