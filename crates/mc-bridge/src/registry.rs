//! Connection registry
//!
//! Tracks live client sessions keyed by a generated [`ConnectionId`]. All
//! writes to a connection go through its queue; the registry never touches the
//! socket itself.

use crate::transport::OutboundFrame;
use chrono::{DateTime, Utc};
use mc_agent_core::{BridgeError, ConnectionId, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A live client session
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    seq: u64,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<OutboundFrame>,
    last_activity: Mutex<Instant>,
    alive: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Record inbound or outbound traffic
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    /// Queue a text frame on the connection's writer and wait for the write.
    pub async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_alive() {
            return Err(BridgeError::ConnectionClosed(self.id.clone()));
        }

        let (ack, written) = oneshot::channel();
        self.outbound
            .send(OutboundFrame { text, ack })
            .await
            .map_err(|_| BridgeError::ConnectionClosed(self.id.clone()))?;

        written
            .await
            .map_err(|_| BridgeError::ConnectionClosed(self.id.clone()))??;

        self.touch();
        Ok(())
    }

    /// Force the session to close. The session task runs the cleanup.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.shutdown.cancel();
    }
}

/// Status snapshot of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Registry of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_seq: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new connection whose frames are written through `outbound`.
    pub(crate) fn register(
        &self,
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<OutboundFrame>,
        shutdown: CancellationToken,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id: id.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            peer,
            connected_at: Utc::now(),
            outbound,
            last_activity: Mutex::new(Instant::now()),
            alive: AtomicBool::new(true),
            shutdown,
        });
        self.connections.write().insert(id, connection.clone());
        connection
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Remove a connection; no-op if absent
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(id)
    }

    /// Earliest-registered live connection, used when a caller names no target
    pub fn any_active(&self) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_alive())
            .min_by_key(|c| c.seq)
            .cloned()
    }

    /// Live connections in registration order
    pub fn active(&self) -> Vec<Arc<Connection>> {
        let mut live: Vec<_> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_alive())
            .cloned()
            .collect();
        live.sort_by_key(|c| c.seq);
        live
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.active().into_iter().map(|c| c.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.active()
            .into_iter()
            .map(|c| ConnectionInfo {
                id: c.id.clone(),
                peer: c.peer.map(|p| p.to_string()),
                connected_at: c.connected_at,
                idle_secs: c.idle_for().as_secs(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close every connection
    pub fn close_all(&self) {
        for connection in self.connections.read().values() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(
        registry: &ConnectionRegistry,
        id: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = registry.register(ConnectionId::from(id), None, tx, CancellationToken::new());
        (conn, rx)
    }

    #[test]
    fn test_register_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let (_conn, _rx) = register(&registry, "a");

        assert!(registry.lookup(&ConnectionId::from("a")).is_some());
        assert!(registry.lookup(&ConnectionId::from("b")).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&ConnectionId::from("a")).is_some());
        assert!(registry.remove(&ConnectionId::from("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_any_active_prefers_first_registered() {
        let registry = ConnectionRegistry::new();
        assert!(registry.any_active().is_none());

        let (first, _rx1) = register(&registry, "zzz");
        let (_second, _rx2) = register(&registry, "aaa");
        assert_eq!(registry.any_active().unwrap().id().as_str(), "zzz");

        first.close();
        assert_eq!(registry.any_active().unwrap().id().as_str(), "aaa");
        assert_eq!(registry.ids(), vec![ConnectionId::from("aaa")]);
    }

    #[tokio::test]
    async fn test_send_text_waits_for_write_ack() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = register(&registry, "a");

        let sender = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send_text("frame".into()).await }
        });

        let OutboundFrame { text, ack } = rx.recv().await.unwrap();
        assert_eq!(text, "frame");
        ack.send(Ok(())).unwrap();
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_on_closed_connection_fails() {
        let registry = ConnectionRegistry::new();
        let (conn, rx) = register(&registry, "a");

        conn.close();
        let err = conn.send_text("x".into()).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed(_)));

        let (conn2, rx2) = register(&registry, "b");
        drop(rx2);
        let err = conn2.send_text("x".into()).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed(_)));
        drop(rx);
    }

    #[test]
    fn test_snapshot_reports_live_connections() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(
            ConnectionId::from("a"),
            Some("127.0.0.1:5000".parse().unwrap()),
            tx,
            CancellationToken::new(),
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].peer.as_deref(), Some("127.0.0.1:5000"));
        assert_eq!(snapshot[0].idle_secs, 0);
    }
}
