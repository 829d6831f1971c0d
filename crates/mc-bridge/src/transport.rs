//! Transport abstractions for client sessions
//!
//! Provides FrameReader/FrameWriter traits that the session handler runs on.
//! The WebSocket transport implements them in [`crate::ws`]; tests use
//! in-memory channels.

use crate::packet_log::{Direction, PacketLogger};
use async_trait::async_trait;
use mc_agent_core::{BridgeError, ConnectionId, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Trait for async reading from a transport
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next text frame. `Ok(None)` means the peer closed cleanly.
    async fn read_frame(&mut self) -> Result<Option<String>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one complete text frame
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;
}

/// Work item for a connection's writer task
pub(crate) struct OutboundFrame {
    pub text: String,
    pub ack: oneshot::Sender<Result<()>>,
}

/// Single writer per connection
///
/// Owns the write half; concurrent senders queue on `rx` and learn the write
/// outcome through their ack slot. A failed write cancels `shutdown`, which
/// tears the session down.
pub(crate) async fn writer_task<W: FrameWriter>(
    mut writer: W,
    mut rx: mpsc::Receiver<OutboundFrame>,
    shutdown: CancellationToken,
    connection_id: ConnectionId,
    packet_log: Option<Arc<PacketLogger>>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => frame,
            _ = shutdown.cancelled() => None,
        };

        let Some(OutboundFrame { text, ack }) = frame else {
            break;
        };

        if let Some(log) = &packet_log {
            log.record(Direction::Outbound, &connection_id, &text);
        }

        let preview: String = text.chars().take(200).collect();
        debug!(connection = %connection_id, "[Rust→MC] len={} json={}", text.len(), preview);

        match writer.write_frame(&text).await {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                error!(connection = %connection_id, "Write failed: {}", e);
                let _ = ack.send(Err(e));
                shutdown.cancel();
                break;
            }
        }
    }

    // Anything still queued learns the connection is gone
    rx.close();
    while let Some(OutboundFrame { ack, .. }) = rx.recv().await {
        let _ = ack.send(Err(BridgeError::ConnectionClosed(connection_id.clone())));
    }

    if let Err(e) = writer.close().await {
        debug!(connection = %connection_id, "Close after shutdown failed: {}", e);
    }
}

/// In-memory transport
///
/// Lets a session run without a socket: the peer side pushes inbound frames and
/// observes everything the bridge writes.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct MemoryReader(mpsc::UnboundedReceiver<Result<String>>);

    #[async_trait]
    impl FrameReader for MemoryReader {
        async fn read_frame(&mut self) -> Result<Option<String>> {
            self.0.recv().await.transpose()
        }
    }

    pub struct MemoryWriter {
        tx: mpsc::UnboundedSender<String>,
        fail_writes: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameWriter for MemoryWriter {
        async fn write_frame(&mut self, frame: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BridgeError::Transport("write refused by peer".into()));
            }
            self.tx
                .send(frame.to_string())
                .map_err(|_| BridgeError::Transport("peer dropped".into()))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Remote end of a memory transport
    pub struct MemoryPeer {
        inbound: Option<mpsc::UnboundedSender<Result<String>>>,
        outbound: mpsc::UnboundedReceiver<String>,
        fail_writes: Arc<AtomicBool>,
    }

    impl MemoryPeer {
        /// Deliver a frame to the bridge
        pub fn send(&self, frame: impl Into<String>) {
            if let Some(tx) = &self.inbound {
                let _ = tx.send(Ok(frame.into()));
            }
        }

        /// Deliver a transport error to the bridge
        pub fn send_error(&self, reason: &str) {
            if let Some(tx) = &self.inbound {
                let _ = tx.send(Err(BridgeError::Transport(reason.to_string())));
            }
        }

        /// Next frame written by the bridge; `None` once the writer is gone
        pub async fn recv(&mut self) -> Option<String> {
            self.outbound.recv().await
        }

        /// Next frame written by the bridge, decoded as JSON
        pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
            let text = self.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// Make every subsequent bridge write fail
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Close the inbound side, as a peer hanging up would
        pub fn hang_up(&mut self) {
            self.inbound = None;
        }
    }

    pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));
        (
            MemoryReader(in_rx),
            MemoryWriter {
                tx: out_tx,
                fail_writes: fail_writes.clone(),
            },
            MemoryPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
                fail_writes,
            },
        )
    }
}
