//! Process-wide table of live connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chime_core::{ConnectionId, ConversationId, Envelope};
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::errors::{EnqueueError, RegistryError};
use crate::metrics::OOB_SEND_FAILURES_TOTAL;

/// Live connections indexed by connection ID.
///
/// A connection is present exactly while its transport is open. Removal
/// closes the connection's outbound queue.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create an empty registry whose [`send`](Self::send) waits up to `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.write();
        if conns.contains_key(&connection.id) {
            return Err(RegistryError::DuplicateConnection(connection.id.clone()));
        }
        debug!(conn_id = %connection.id, "connection registered");
        let _ = conns.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Unregister a connection and close its outbound queue. No-op if absent.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(id);
        if let Some(conn) = &removed {
            let _ = conn.close_queue();
            debug!(conn_id = %id, "connection unregistered");
        }
        removed
    }

    /// Look up a live connection.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Out-of-band send using the registry's default timeout.
    pub async fn send(&self, id: &ConnectionId, envelope: Envelope) -> Result<(), RegistryError> {
        self.send_with_timeout(id, envelope, self.send_timeout).await
    }

    /// Out-of-band send that gives up once the queue stays full past `timeout`.
    pub async fn send_with_timeout(
        &self,
        id: &ConnectionId,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let conn = self
            .lookup(id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(id.clone()))?;
        conn.enqueue_timeout(envelope, timeout).await.map_err(|e| {
            counter!(OOB_SEND_FAILURES_TOTAL).increment(1);
            warn!(conn_id = %id, error = %e, "out-of-band send failed");
            match e {
                EnqueueError::Timeout => RegistryError::SendTimeout(id.clone()),
                EnqueueError::Closed => RegistryError::Closed(id.clone()),
            }
        })
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Connections currently bound to `conversation`.
    pub fn conversation_connections(
        &self,
        conversation: &ConversationId,
    ) -> Vec<Arc<ClientConnection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.conversation_id().as_ref() == Some(conversation))
            .cloned()
            .collect()
    }

    /// Number of distinct conversations bound by live connections.
    pub fn active_conversations(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter_map(|c| c.conversation_id())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Snapshot of every live connection.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }
}
