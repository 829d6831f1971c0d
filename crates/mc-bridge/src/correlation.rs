//! Correlation table
//!
//! Maps outstanding request ids to the waiter that expects the reply. Every
//! entry completes exactly once: the first of resolve, expire, cancel or
//! connection failure removes it under the lock and fills its slot; later
//! attempts find nothing and return `false`.

use mc_agent_core::{ConnectionId, RequestId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// How a pending request finished
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Matching response body
    Response(Value),
    /// No response before the deadline
    TimedOut,
    /// Owning connection went away
    ConnectionClosed,
    /// Caller gave up (waiter dropped or explicit cancel)
    Cancelled,
}

#[derive(Debug)]
struct PendingRequest {
    connection_id: ConnectionId,
    created_at: Instant,
    slot: oneshot::Sender<Completion>,
}

/// Outstanding requests awaiting a response
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the handle its caller awaits.
    ///
    /// Register before sending so an early reply still finds the entry.
    pub fn register(
        self: &Arc<Self>,
        request_id: RequestId,
        connection_id: ConnectionId,
        timeout: Duration,
    ) -> Waiter {
        let (slot, rx) = oneshot::channel();
        let now = Instant::now();
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                connection_id,
                created_at: now,
                slot,
            },
        );
        Waiter {
            request_id,
            deadline: now + timeout,
            rx,
            table: self.clone(),
        }
    }

    /// Complete with a response body; `false` for unknown or finished ids
    pub fn resolve(&self, request_id: &RequestId, body: Value) -> bool {
        self.complete(request_id, Completion::Response(body))
    }

    /// Complete with a timeout if still pending
    pub fn expire(&self, request_id: &RequestId) -> bool {
        self.complete(request_id, Completion::TimedOut)
    }

    /// Complete as cancelled if still pending
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.complete(request_id, Completion::Cancelled)
    }

    /// Fail every request owned by a connection; returns how many were failed
    pub fn fail_connection(&self, connection_id: &ConnectionId) -> usize {
        let failed: Vec<(RequestId, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, p)| &p.connection_id == connection_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let count = failed.len();
        for (request_id, request) in failed {
            debug!(
                connection = %connection_id,
                request_id = %request_id,
                "Failing pending request"
            );
            let _ = request.slot.send(Completion::ConnectionClosed);
        }
        count
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn complete(&self, request_id: &RequestId, completion: Completion) -> bool {
        // Removal under the lock is the single point that decides the winner
        let Some(request) = self.pending.lock().remove(request_id) else {
            return false;
        };
        debug!(
            request_id = %request_id,
            connection = %request.connection_id,
            elapsed_ms = request.created_at.elapsed().as_millis() as u64,
            "Request completed: {:?}",
            completion_kind(&completion)
        );
        // The caller may already be gone; the entry is evicted either way
        let _ = request.slot.send(completion);
        true
    }
}

fn completion_kind(completion: &Completion) -> &'static str {
    match completion {
        Completion::Response(_) => "response",
        Completion::TimedOut => "timed_out",
        Completion::ConnectionClosed => "connection_closed",
        Completion::Cancelled => "cancelled",
    }
}

/// Caller side of a pending request
///
/// Dropping an unfinished waiter cancels its entry.
#[derive(Debug)]
pub struct Waiter {
    request_id: RequestId,
    deadline: Instant,
    rx: oneshot::Receiver<Completion>,
    table: Arc<CorrelationTable>,
}

impl Waiter {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the first completion or the deadline, whichever comes first
    pub async fn wait(mut self) -> Completion {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(completion) => completion.unwrap_or(Completion::Cancelled),
            Err(_) => {
                // A resolve may have won the race; either way the slot is filled now
                self.table.expire(&self.request_id);
                (&mut self.rx).await.unwrap_or(Completion::TimedOut)
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.table.cancel(&self.request_id);
    }
}
