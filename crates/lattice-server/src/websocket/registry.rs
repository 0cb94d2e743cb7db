//! The live set of connections eligible for dispatch.
//!
//! The registry lock is narrow-scope: membership mutation only. Anything
//! that performs I/O iterates over a [`ConnectionRegistry::snapshot`]
//! copy, never under the lock. Mutation happens in exactly two places —
//! admission (hub connect path) and eviction (dispatch worker).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use lattice_core::ids::ConnectionId;

use super::connection::ClientConnection;

/// Registry of all connected clients with an admission ceiling.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    max_connections: usize,
    drops: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` clients.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
            drops: AtomicU64::new(0),
        }
    }

    /// Admit a connection. Returns `false` when the ceiling is reached;
    /// the caller must then close the transport without admitting it.
    pub fn register(&self, conn: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write();
        if conns.len() >= self.max_connections {
            return false;
        }
        let _ = conns.insert(conn.id.clone(), conn);
        true
    }

    /// Remove a connection. Idempotent; returns whether it was present so
    /// callers can skip double-teardown work.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.write().remove(id).is_some()
    }

    /// Look up a connection by ID.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// A copy of the current membership, safe to iterate without the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Current connection count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// The admission ceiling.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Record a slow-consumer drop; returns the new process-wide total.
    pub fn record_drop(&self) -> u64 {
        self.drops.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Process-wide slow-consumer drop total.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_conn(id: &str) -> Arc<ClientConnection> {
        let (conn, _rx) = ClientConnection::new(ConnectionId::from_string(id.into()), 4);
        Arc::new(conn)
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(10);
        assert!(registry.is_empty());

        let conn = make_conn("conn_1");
        assert!(registry.register(conn));
        assert_eq!(registry.len(), 1);

        let id = ConnectionId::from_string("conn_1".into());
        assert!(registry.unregister(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(10);
        let conn = make_conn("conn_1");
        assert!(registry.register(conn));

        let id = ConnectionId::from_string("conn_1".into());
        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(!registry.unregister(&ConnectionId::from_string("conn_missing".into())));
    }

    #[test]
    fn ceiling_rejects_excess_registrations() {
        let registry = ConnectionRegistry::new(2);
        assert!(registry.register(make_conn("conn_1")));
        assert!(registry.register(make_conn("conn_2")));
        assert!(!registry.register(make_conn("conn_3")));
        assert_eq!(registry.len(), 2);

        // Freeing a slot admits again.
        assert!(registry.unregister(&ConnectionId::from_string("conn_1".into())));
        assert!(registry.register(make_conn("conn_3")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_size_never_exceeds_ceiling() {
        let registry = ConnectionRegistry::new(5);
        for i in 0..20 {
            let _ = registry.register(make_conn(&format!("conn_{i}")));
        }
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let registry = ConnectionRegistry::new(10);
        assert!(registry.register(make_conn("conn_1")));
        assert!(registry.register(make_conn("conn_2")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);

        // Mutating the registry does not affect the snapshot.
        assert!(registry.unregister(&ConnectionId::from_string("conn_1".into())));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_returns_registered_connection() {
        let registry = ConnectionRegistry::new(10);
        assert!(registry.register(make_conn("conn_1")));

        let id = ConnectionId::from_string("conn_1".into());
        assert!(registry.get(&id).is_some());
        assert!(registry
            .get(&ConnectionId::from_string("conn_other".into()))
            .is_none());
    }

    #[test]
    fn drop_counter_accumulates() {
        let registry = ConnectionRegistry::new(10);
        assert_eq!(registry.drop_count(), 0);
        assert_eq!(registry.record_drop(), 1);
        assert_eq!(registry.record_drop(), 2);
        assert_eq!(registry.drop_count(), 2);
    }
}
