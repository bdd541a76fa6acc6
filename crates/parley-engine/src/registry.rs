use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use tracing::{debug, warn};

use parley_core::ids::ConnectionId;
use parley_telemetry::metrics::WS_CONNECTIONS_ACTIVE;

use crate::connection::Connection;

/// The set of open connections.
///
/// Reads take a point-in-time snapshot under the read lock; writes are
/// exclusive. Removal closes the connection while the write lock is held, so
/// once `remove` returns no snapshot can contain it in an open state.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened connection. Call at most once per connection.
    pub fn add(&self, connection: Arc<Connection>) {
        let mut conns = self.connections.write();
        let id = connection.id().clone();
        if let Some(previous) = conns.insert(id.clone(), Arc::clone(&connection)) {
            if !Arc::ptr_eq(&previous, &connection) {
                warn!(conn_id = %id, "connection id reused, closing previous entry");
                previous.close();
            }
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
        debug!(conn_id = %id, active = conns.len(), "connection registered");
    }

    /// Deregister and close a connection. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut conns = self.connections.write();
        let removed = conns.remove(id);
        if let Some(conn) = &removed {
            conn.close();
            gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
            debug!(conn_id = %id, active = conns.len(), "connection removed");
        }
        removed
    }

    /// Snapshot of every open connection except `excluding`.
    pub fn others(&self, excluding: &ConnectionId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.id() != excluding && c.is_open())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
