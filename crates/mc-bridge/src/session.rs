//! Transport session handler
//!
//! One task per connection: registers the connection, greets the client,
//! subscribes to events, then reads frames in arrival order until the peer
//! goes away or the bridge shuts down.

use crate::correlation::CorrelationTable;
use crate::dispatcher::subscribe_on;
use crate::events::EventDispatcher;
use crate::packet_log::{Direction, PacketLogger};
use crate::registry::{Connection, ConnectionRegistry};
use crate::transport::{FrameReader, FrameWriter, writer_task};
use mc_agent_core::{ConnectionId, Envelope, Inbound, Result, WelcomeMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state every session works against
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub correlation: Arc<CorrelationTable>,
    pub events: Arc<EventDispatcher>,
    pub packet_log: Option<Arc<PacketLogger>>,
    pub host: String,
    pub port: u16,
    pub subscriptions: Vec<String>,
    pub write_queue: usize,
    pub shutdown: CancellationToken,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!(connection = %self.id, "Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Run a client session to completion and return its connection id
pub(crate) async fn run_session<R, W>(
    ctx: SessionContext,
    mut reader: R,
    writer: W,
    peer: Option<SocketAddr>,
) -> ConnectionId
where
    R: FrameReader,
    W: FrameWriter + 'static,
{
    let mut session = Session {
        id: ConnectionId::new(),
        state: SessionState::Connecting,
    };
    let id = session.id.clone();
    let shutdown = ctx.shutdown.child_token();

    let (tx, rx) = mpsc::channel(ctx.write_queue.max(1));
    let writer_handle = tokio::spawn(writer_task(
        writer,
        rx,
        shutdown.clone(),
        id.clone(),
        ctx.packet_log.clone(),
    ));

    let connection = ctx.registry.register(id.clone(), peer, tx, shutdown.clone());
    info!(connection = %id, peer = ?peer, "Client connected");

    if let Err(e) = greet(&ctx, &connection).await {
        warn!(connection = %id, "Handshake incomplete: {}", e);
    }
    session.transition(SessionState::Active);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(connection = %id, "Session cancelled");
                break;
            }
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(Some(text)) => {
                connection.touch();
                if let Some(log) = &ctx.packet_log {
                    log.record(Direction::Inbound, &id, &text);
                }
                handle_frame(&ctx, &id, &text);
            }
            Ok(None) => {
                info!(connection = %id, "Client disconnected");
                break;
            }
            Err(e) => {
                error!(connection = %id, "Transport error: {}", e);
                break;
            }
        }
    }

    session.transition(SessionState::Closing);
    connection.close();
    ctx.registry.remove(&id);
    let failed = ctx.correlation.fail_connection(&id);
    if failed > 0 {
        info!(connection = %id, "Failed {} pending request(s) on close", failed);
    }
    let _ = writer_handle.await;
    session.transition(SessionState::Closed);

    id
}

async fn greet(ctx: &SessionContext, connection: &Connection) -> Result<()> {
    let welcome = WelcomeMessage::new(connection.id(), &ctx.host, ctx.port);
    connection.send_text(serde_json::to_string(&welcome)?).await?;

    for event_name in &ctx.subscriptions {
        subscribe_on(connection, event_name).await?;
    }
    Ok(())
}

/// Classify one frame and route it. Never blocks on application work.
fn handle_frame(ctx: &SessionContext, id: &ConnectionId, text: &str) {
    let preview: String = text.chars().take(200).collect();
    debug!(connection = %id, "[MC→Rust] len={} json={}", text.len(), preview);

    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(connection = %id, "Dropping malformed frame: {}", e);
            return;
        }
    };

    match Inbound::classify(envelope) {
        Inbound::Event { name, body } => ctx.events.dispatch(id.clone(), name, body),
        Inbound::Response { request_id, body } => {
            if !ctx.correlation.resolve(&request_id, body) {
                debug!(connection = %id, request_id = %request_id, "Unmatched response");
            }
        }
        Inbound::Unknown(envelope) => {
            debug!(
                connection = %id,
                "Unclassified frame (purpose {:?})",
                envelope.header.message_purpose.as_str()
            );
        }
    }
}
