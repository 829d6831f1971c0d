//! Event dispatcher
//!
//! Hands classified game events to a single external handler. Each event runs
//! on its own task so a slow or failing handler never holds up the read loop.

use async_trait::async_trait;
use futures::FutureExt;
use mc_agent_core::{ConnectionId, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Receiver of unsolicited game events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event_name: String,
        body: Value,
    ) -> Result<()>;
}

/// Routes events to the current handler
#[derive(Default)]
pub struct EventDispatcher {
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
    tasks: TaskTracker,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the handler
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Dispatch one event without waiting for the handler
    pub fn dispatch(&self, connection_id: ConnectionId, event_name: String, body: Value) {
        let Some(handler) = self.handler.read().clone() else {
            log_unhandled(&connection_id, &event_name, &body);
            return;
        };

        self.tasks.spawn(async move {
            let call = handler.handle_event(connection_id.clone(), event_name.clone(), body);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        connection = %connection_id,
                        event = %event_name,
                        "Event handler failed: {}",
                        e
                    )
                }
                Err(_) => {
                    warn!(
                        connection = %connection_id,
                        event = %event_name,
                        "Event handler panicked"
                    )
                }
            }
        });
    }

    /// Number of handler tasks still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched handler task to finish
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

fn log_unhandled(connection_id: &ConnectionId, event_name: &str, body: &Value) {
    if event_name == "PlayerMessage" {
        let sender = body.get("sender").and_then(Value::as_str).unwrap_or("?");
        let message = body.get("message").and_then(Value::as_str).unwrap_or("");
        info!(connection = %connection_id, "<{}> {}", sender, message);
    } else {
        debug!(connection = %connection_id, "Unhandled event {}", event_name);
    }
}
