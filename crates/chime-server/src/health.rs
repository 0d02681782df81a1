//! `/health` report.

use std::time::Instant;

use serde::Serialize;

use crate::websocket::registry::ConnectionRegistry;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `"ok"`, or `"draining"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Distinct conversations bound to live connections.
    pub active_conversations: usize,
}

impl HealthReport {
    /// Snapshot the registry.
    pub fn snapshot(started: Instant, registry: &ConnectionRegistry, draining: bool) -> Self {
        Self {
            status: if draining { "draining" } else { "ok" },
            uptime_secs: started.elapsed().as_secs(),
            connections: registry.len(),
            active_conversations: registry.active_conversations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chime_core::{ConnectionId, ConversationId};
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::ClientConnection;

    fn registry_with(conversations: &[&str]) -> ConnectionRegistry {
        let registry = ConnectionRegistry::new(Duration::from_secs(5));
        for (i, conv) in conversations.iter().enumerate() {
            let (tx, _rx) = mpsc::channel(1);
            let conn = Arc::new(ClientConnection::new(ConnectionId::from_raw(format!("conn_{i}")), tx));
            conn.bind_conversation(ConversationId::from_raw(*conv));
            registry.add(conn).unwrap();
        }
        registry
    }

    #[test]
    fn empty_server_is_ok() {
        let report = HealthReport::snapshot(Instant::now(), &registry_with(&[]), false);
        assert_eq!(report.status, "ok");
        assert_eq!(report.connections, 0);
        assert!(report.uptime_secs < 2);
    }

    #[test]
    fn shared_conversations_counted_once() {
        let registry = registry_with(&["conv_a", "conv_a", "conv_b"]);
        let report = HealthReport::snapshot(Instant::now(), &registry, false);
        assert_eq!(report.connections, 3);
        assert_eq!(report.active_conversations, 2);
    }

    #[test]
    fn draining_during_shutdown() {
        let started = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        let report = HealthReport::snapshot(started, &registry_with(&[]), true);
        assert_eq!(report.status, "draining");
        assert!(report.uptime_secs >= 89);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "draining");
        assert!(json["active_conversations"].is_number());
    }
}
