//! WebSocket listener
//!
//! `BridgeServer` owns the shared state (registry, correlation table, event and
//! command dispatchers). `start` binds the listener and returns a
//! [`ServerHandle`] whose `shutdown` stops everything in order.

use crate::config::BridgeConfig;
use crate::correlation::CorrelationTable;
use crate::dispatcher::{CommandDispatcher, DispatchConfig};
use crate::events::EventDispatcher;
use crate::health::{BackgroundTask, HealthMonitor};
use crate::packet_log::PacketLogger;
use crate::registry::ConnectionRegistry;
use crate::session::{SessionContext, run_session};
use crate::transport::{FrameReader, FrameWriter};
use crate::ws;
use mc_agent_core::{ConnectionId, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Minecraft WebSocket bridge
pub struct BridgeServer {
    config: BridgeConfig,
    registry: Arc<ConnectionRegistry>,
    correlation: Arc<CorrelationTable>,
    events: Arc<EventDispatcher>,
    dispatcher: Arc<CommandDispatcher>,
    sessions: TaskTracker,
    shutdown: CancellationToken,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let correlation = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            registry.clone(),
            correlation.clone(),
            DispatchConfig::from(&config),
        ));
        Self {
            config,
            registry,
            correlation,
            events: Arc::new(EventDispatcher::new()),
            dispatcher,
            sessions: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn correlation(&self) -> Arc<CorrelationTable> {
        self.correlation.clone()
    }

    pub fn events(&self) -> Arc<EventDispatcher> {
        self.events.clone()
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    /// Run a session over an already-established transport
    pub fn attach<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<SocketAddr>,
    ) -> JoinHandle<ConnectionId>
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        self.sessions
            .spawn(run_session(self.session_context(None), reader, writer, peer))
    }

    /// Bind the listener and start accepting clients
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let (packet_log, packet_log_task) = match &self.config.packet_log {
            Some(path) => {
                let (logger, task) = PacketLogger::open(path).await?;
                info!("Logging packets to {}", path.display());
                (Some(Arc::new(logger)), Some(task))
            }
            None => (None, None),
        };

        let health = HealthMonitor::new(
            self.registry.clone(),
            self.correlation.clone(),
            self.config.health_check_interval(),
            self.config.connection_timeout(),
        )
        .spawn(self.shutdown.child_token());

        let accept = tokio::spawn(accept_loop(
            listener,
            self.session_context(packet_log),
            self.sessions.clone(),
            self.shutdown.clone(),
        ));

        info!("WebSocket server listening on ws://{}", local_addr);

        Ok(ServerHandle {
            local_addr,
            shutdown: self.shutdown,
            accept,
            health,
            sessions: self.sessions,
            registry: self.registry,
            events: self.events,
            packet_log_task,
        })
    }

    fn session_context(&self, packet_log: Option<Arc<PacketLogger>>) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            correlation: self.correlation.clone(),
            events: self.events.clone(),
            packet_log,
            host: self.config.host.clone(),
            port: self.config.port,
            subscriptions: self.config.subscriptions.clone(),
            write_queue: self.config.write_queue,
            shutdown: self.shutdown.clone(),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: SessionContext,
    sessions: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            },
        };

        debug!(peer = %peer, "TCP connection accepted");
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        sessions.spawn(async move {
            let handshake = tokio::select! {
                _ = shutdown.cancelled() => return,
                handshake = tokio_tungstenite::accept_async(stream) => handshake,
            };
            match handshake {
                Ok(socket) => {
                    let (reader, writer) = ws::split(socket);
                    run_session(ctx, reader, writer, Some(peer)).await;
                }
                Err(e) => warn!(peer = %peer, "WebSocket handshake failed: {}", e),
            }
        });
    }
    debug!("Accept loop stopped");
}

/// Running bridge
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept: JoinHandle<()>,
    health: BackgroundTask,
    sessions: TaskTracker,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventDispatcher>,
    packet_log_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, stop the health monitor, close every session and wait
    /// for in-flight event handlers.
    pub async fn shutdown(self) {
        info!("Shutting down bridge");
        self.shutdown.cancel();
        let _ = self.accept.await;
        self.health.stop().await;

        self.registry.close_all();
        self.sessions.close();
        self.sessions.wait().await;
        self.events.drain().await;

        if let Some(task) = self.packet_log_task {
            // The writer ends once the last session drops its logger handle
            let _ = task.await;
        }
        info!("Bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{CommandReply, SendOptions};
    use futures::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    fn local_config() -> BridgeConfig {
        BridgeConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    async fn next_json<S>(ws: &mut S) -> Value
    where
        S: futures::Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_round_trip_and_shutdown() {
        let server = BridgeServer::new(local_config());
        let dispatcher = server.dispatcher();
        let registry = server.registry();
        let correlation = server.correlation();
        let handle = server.start().await.unwrap();

        let url = format!("ws://{}", handle.local_addr());
        let (mut ws, _) = connect_async(url).await.unwrap();

        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome");
        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["body"]["eventName"], "PlayerMessage");

        let call = tokio::spawn(async move {
            dispatcher
                .send_command(None, "say hi", SendOptions::wait())
                .await
        });

        let command = next_json(&mut ws).await;
        assert_eq!(command["body"]["commandLine"], "say hi");
        let reply = json!({
            "header": {"requestId": command["header"]["requestId"], "messagePurpose": "commandResponse", "version": 1},
            "body": {"statusCode": 0, "statusMessage": "ok"},
        });
        ws.send(Message::Text(reply.to_string().into())).await.unwrap();

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(
            outcome.reply,
            CommandReply::Response(json!({"statusCode": 0, "statusMessage": "ok"}))
        );
        assert_eq!(registry.len(), 1);

        // A pending request is failed by shutdown rather than left hanging
        let waiter = correlation.register(
            mc_agent_core::RequestId::new(),
            outcome.connection_id.clone(),
            std::time::Duration::from_secs(60),
        );

        handle.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(waiter.wait().await, crate::correlation::Completion::ConnectionClosed);

        // Client sees the socket go away
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_failed_handshake_does_not_stop_listener() {
        let server = BridgeServer::new(local_config());
        let registry = server.registry();
        let handle = server.start().await.unwrap();

        // Plain TCP client that sends garbage instead of an upgrade request
        {
            use tokio::io::AsyncWriteExt;
            let mut raw = tokio::net::TcpStream::connect(handle.local_addr()).await.unwrap();
            raw.write_all(b"hello\r\n\r\n").await.unwrap();
        }

        let (mut ws, _) = connect_async(format!("ws://{}", handle.local_addr())).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "welcome");
        assert_eq!(registry.len(), 1);

        handle.shutdown().await;
    }
}
