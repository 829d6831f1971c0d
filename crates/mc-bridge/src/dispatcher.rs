//! Command dispatcher
//!
//! The only outbound path for commands: picks the target connection, assigns a
//! fresh request id, registers the waiter before the frame goes out, and
//! resends on write failure when the caller is waiting for a reply.

use crate::config::BridgeConfig;
use crate::correlation::{Completion, CorrelationTable};
use crate::registry::{Connection, ConnectionRegistry};
use mc_agent_core::{BridgeError, ConnectionId, Envelope, RequestId, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timing and retry policy for [`CommandDispatcher`]
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub reconnect_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for DispatchConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            default_timeout: config.command_timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            reconnect_wait: config.reconnect_wait(),
        }
    }
}

/// Per-call send options
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub wait_for_response: bool,
    /// Overrides the dispatcher's default timeout
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Wait for the reply with the default timeout
    pub fn wait() -> Self {
        Self {
            wait_for_response: true,
            timeout: None,
        }
    }

    /// Send and return as soon as the frame is written
    pub fn fire_and_forget() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait_for_response = wait;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What came back for an accepted command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum CommandReply {
    /// Caller did not wait
    NotAwaited,
    Response(Value),
    TimedOut,
    ConnectionClosed,
    Cancelled,
}

impl CommandReply {
    pub fn response(&self) -> Option<&Value> {
        match self {
            CommandReply::Response(body) => Some(body),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CommandReply::NotAwaited => "not_awaited",
            CommandReply::Response(_) => "response",
            CommandReply::TimedOut => "timed_out",
            CommandReply::ConnectionClosed => "connection_closed",
            CommandReply::Cancelled => "cancelled",
        }
    }
}

impl From<Completion> for CommandReply {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Response(body) => CommandReply::Response(body),
            Completion::TimedOut => CommandReply::TimedOut,
            Completion::ConnectionClosed => CommandReply::ConnectionClosed,
            Completion::Cancelled => CommandReply::Cancelled,
        }
    }
}

/// Result of an accepted command (the frame was written)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub connection_id: ConnectionId,
    /// Id of the attempt that was written
    pub request_id: RequestId,
    pub reply: CommandReply,
    pub attempts: u32,
}

impl CommandOutcome {
    pub fn response(&self) -> Option<&Value> {
        self.reply.response()
    }
}

/// Sends commands to connected clients
pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
    correlation: Arc<CorrelationTable>,
    config: DispatchConfig,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        correlation: Arc<CorrelationTable>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            correlation,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send a raw command line.
    ///
    /// With no `target` the earliest live connection is used. Errors mean the
    /// command was not accepted; a missing reply is reported in
    /// [`CommandOutcome::reply`].
    pub async fn send_command(
        &self,
        target: Option<&ConnectionId>,
        command_line: &str,
        options: SendOptions,
    ) -> Result<CommandOutcome> {
        let mut connection = self.resolve_target(target)?;
        let connection_id = connection.id().clone();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let request_id = RequestId::new();
            let frame = Envelope::command(request_id.clone(), command_line).to_text()?;

            let waiter = options
                .wait_for_response
                .then(|| {
                    self.correlation
                        .register(request_id.clone(), connection_id.clone(), timeout)
                });

            debug!(
                connection = %connection_id,
                request_id = %request_id,
                attempt = attempts,
                "Sending command: {}",
                command_line
            );

            let err = match connection.send_text(frame).await {
                Ok(()) => {
                    let reply = match waiter {
                        Some(waiter) => CommandReply::from(waiter.wait().await),
                        None => CommandReply::NotAwaited,
                    };
                    return Ok(CommandOutcome {
                        connection_id,
                        request_id,
                        reply,
                        attempts,
                    });
                }
                Err(e) => e,
            };

            // Evict this attempt's entry; a resend uses a new id
            drop(waiter);

            if !options.wait_for_response || attempts > self.config.max_retries {
                return Err(BridgeError::SendFailed {
                    connection: connection_id,
                    attempts,
                    reason: err.to_string(),
                });
            }

            warn!(
                connection = %connection_id,
                attempt = attempts,
                "Send failed, waiting to resend: {}",
                err
            );
            connection = match self.await_reconnect(&connection_id).await {
                Some(connection) => connection,
                None => {
                    return Err(BridgeError::SendFailed {
                        connection: connection_id,
                        attempts,
                        reason: format!("{err}; connection did not come back"),
                    });
                }
            };
        }
    }

    /// `tellraw <selector> {"rawtext":[{"text":...}]}`
    pub async fn tell_raw(
        &self,
        target: Option<&ConnectionId>,
        selector: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<CommandOutcome> {
        let rawtext = json!({ "rawtext": [{ "text": text }] });
        self.send_command(target, &format!("tellraw {selector} {rawtext}"), options)
            .await
    }

    /// Green chat line to every player on the target connection
    pub async fn send_game_message(
        &self,
        target: Option<&ConnectionId>,
        text: &str,
    ) -> Result<CommandOutcome> {
        self.tell_raw(target, "@a", &format!("§a{text}"), SendOptions::fire_and_forget())
            .await
    }

    /// Chat line on every live connection; returns how many accepted it
    pub async fn broadcast_message(&self, text: &str) -> usize {
        let ids = self.registry.ids();
        let sends = ids.iter().map(|id| self.send_game_message(Some(id), text));
        let results = futures::future::join_all(sends).await;

        let mut delivered = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(_) => delivered += 1,
                Err(e) => warn!(connection = %id, "Broadcast failed: {}", e),
            }
        }
        delivered
    }

    /// `scriptevent <id> <content>`
    pub async fn send_script_event(
        &self,
        target: Option<&ConnectionId>,
        event_id: &str,
        content: &str,
        options: SendOptions,
    ) -> Result<CommandOutcome> {
        self.send_command(target, &format!("scriptevent {event_id} {content}"), options)
            .await
    }

    /// Subscribe a connection to a game event stream
    pub async fn subscribe(&self, connection_id: &ConnectionId, event_name: &str) -> Result<()> {
        let connection = self.resolve_target(Some(connection_id))?;
        subscribe_on(&connection, event_name).await
    }

    fn resolve_target(&self, target: Option<&ConnectionId>) -> Result<Arc<Connection>> {
        match target {
            Some(id) => self
                .registry
                .lookup(id)
                .filter(|c| c.is_alive())
                .ok_or_else(|| BridgeError::ConnectionNotFound(id.clone())),
            None => self
                .registry
                .any_active()
                .ok_or(BridgeError::NoActiveConnection),
        }
    }

    /// Poll the registry for the same connection id to be live again
    async fn await_reconnect(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let deadline = Instant::now() + self.config.reconnect_wait;
        loop {
            tokio::time::sleep(self.config.retry_delay).await;
            if let Some(connection) = self.registry.lookup(connection_id).filter(|c| c.is_alive()) {
                info!(connection = %connection_id, "Connection available again, resending");
                return Some(connection);
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }
}

/// Send one subscribe envelope (not correlated)
pub(crate) async fn subscribe_on(connection: &Connection, event_name: &str) -> Result<()> {
    let frame = Envelope::subscribe(RequestId::new(), event_name).to_text()?;
    connection.send_text(frame).await?;
    debug!(connection = %connection.id(), "Subscribed to {}", event_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::BridgeServer;
    use crate::transport::memory::{self, MemoryPeer};
    use crate::transport::writer_task;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn connect(server: &BridgeServer) -> (MemoryPeer, ConnectionId) {
        let (reader, writer, mut peer) = memory::pair();
        let _session = server.attach(reader, writer, None);
        let welcome = peer.recv_json().await.unwrap();
        let id = ConnectionId::from(welcome["client_id"].as_str().unwrap());
        let _subscribe = peer.recv_json().await.unwrap();
        (peer, id)
    }

    fn reply(request_id: &Value, body: Value) -> String {
        json!({
            "header": {"requestId": request_id, "messagePurpose": "commandResponse", "version": 1},
            "body": body,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_say_hi_resolves_with_response() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (mut peer, id) = connect(&server).await;
        let dispatcher = server.dispatcher();

        let call = tokio::spawn(async move {
            dispatcher
                .send_command(
                    None,
                    "say hi",
                    SendOptions::wait().with_timeout(Duration::from_secs(10)),
                )
                .await
        });

        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["header"]["messagePurpose"], "commandRequest");
        assert_eq!(frame["body"]["commandLine"], "say hi");
        assert_eq!(frame["body"]["origin"]["type"], "player");
        peer.send(reply(&frame["header"]["requestId"], json!({"statusCode": 0})));

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome.connection_id, id);
        assert_eq!(outcome.request_id.as_str(), frame["header"]["requestId"]);
        assert_eq!(outcome.reply, CommandReply::Response(json!({"statusCode": 0})));
        assert_eq!(outcome.attempts, 1);
        assert!(server.correlation().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_command_times_out() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (_peer, _id) = connect(&server).await;

        let started = Instant::now();
        let outcome = server
            .dispatcher()
            .send_command(None, "say hi", SendOptions::wait())
            .await
            .unwrap();

        assert_eq!(outcome.reply, CommandReply::TimedOut);
        assert!(outcome.response().is_none());
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert!(server.correlation().is_empty());
    }

    #[tokio::test]
    async fn test_no_connection_is_rejected_without_side_effects() {
        let server = BridgeServer::new(BridgeConfig::default());

        let err = server
            .dispatcher()
            .send_command(None, "say hi", SendOptions::wait())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NoActiveConnection));
        assert!(server.correlation().is_empty());

        let missing = ConnectionId::from("missing");
        let err = server
            .dispatcher()
            .send_command(Some(&missing), "say hi", SendOptions::wait())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_fire_and_forget_registers_nothing() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (mut peer, id) = connect(&server).await;

        let outcome = server
            .dispatcher()
            .send_command(Some(&id), "time set day", SendOptions::fire_and_forget())
            .await
            .unwrap();
        assert_eq!(outcome.reply, CommandReply::NotAwaited);
        assert!(server.correlation().is_empty());

        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["body"]["commandLine"], "time set day");
    }

    #[tokio::test]
    async fn test_concurrent_commands_match_their_own_replies() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (mut peer, _id) = connect(&server).await;

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = server.dispatcher();
                tokio::spawn(async move {
                    let outcome = dispatcher
                        .send_command(None, &format!("say {i}"), SendOptions::wait())
                        .await
                        .unwrap();
                    (i, outcome)
                })
            })
            .collect();

        let mut frames = Vec::new();
        for _ in 0..8 {
            frames.push(peer.recv_json().await.unwrap());
        }
        // Answer in reverse order, echoing the command line
        for frame in frames.iter().rev() {
            peer.send(reply(
                &frame["header"]["requestId"],
                json!({"echo": frame["body"]["commandLine"]}),
            ));
        }

        for call in calls {
            let (i, outcome) = call.await.unwrap();
            assert_eq!(outcome.response().unwrap()["echo"], format!("say {i}"));
        }
        assert!(server.correlation().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reports_send_failed() {
        let config = BridgeConfig {
            max_retries: 2,
            retry_delay_ms: 100,
            reconnect_wait_secs: 1,
            ..Default::default()
        };
        let server = BridgeServer::new(config);
        let (peer, id) = connect(&server).await;
        peer.fail_writes(true);

        let err = server
            .dispatcher()
            .send_command(Some(&id), "say hi", SendOptions::wait())
            .await
            .unwrap_err();
        match err {
            BridgeError::SendFailed { connection, attempts, reason } => {
                assert_eq!(connection, id);
                assert_eq!(attempts, 1);
                assert!(reason.contains("did not come back"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(server.correlation().is_empty());
    }

    #[tokio::test]
    async fn test_resend_after_reconnect_uses_fresh_id() {
        let config = BridgeConfig {
            retry_delay_ms: 20,
            ..Default::default()
        };
        let server = BridgeServer::new(config);
        let (peer, id) = connect(&server).await;
        let registry = server.registry();
        let correlation = server.correlation();
        peer.fail_writes(true);

        let dispatcher = server.dispatcher();
        let target = id.clone();
        let call = tokio::spawn(async move {
            dispatcher
                .send_command(Some(&target), "say again", SendOptions::wait())
                .await
        });

        // The refused write tears the first session down
        while registry.lookup(&id).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Same client comes back under the same id
        let (_reader, writer, mut new_peer) = memory::pair();
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        tokio::spawn(writer_task(writer, rx, token.clone(), id.clone(), None));
        registry.register(id.clone(), None, tx, token);

        let frame = new_peer.recv_json().await.unwrap();
        assert_eq!(frame["body"]["commandLine"], "say again");
        let request_id = RequestId::from(frame["header"]["requestId"].as_str().unwrap());

        // Only the resend is pending; the first attempt's entry is gone
        assert_eq!(correlation.len(), 1);
        assert!(correlation.contains(&request_id));
        assert!(correlation.resolve(&request_id, json!({"statusCode": 0})));

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.connection_id, id);
        assert_eq!(outcome.request_id, request_id);
        assert_eq!(outcome.reply, CommandReply::Response(json!({"statusCode": 0})));
        assert!(correlation.is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_forget_write_failure_is_not_retried() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (peer, id) = connect(&server).await;
        peer.fail_writes(true);

        let err = server
            .dispatcher()
            .send_command(Some(&id), "say hi", SendOptions::fire_and_forget())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SendFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_helpers_build_command_lines() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (mut peer, id) = connect(&server).await;
        let dispatcher = server.dispatcher();

        dispatcher.send_game_message(Some(&id), "hello \"world\"").await.unwrap();
        let frame = peer.recv_json().await.unwrap();
        let line = frame["body"]["commandLine"].as_str().unwrap();
        assert!(line.starts_with("tellraw @a "));
        let rawtext: Value = serde_json::from_str(&line["tellraw @a ".len()..]).unwrap();
        assert_eq!(rawtext["rawtext"][0]["text"], "§ahello \"world\"");

        dispatcher
            .send_script_event(
                Some(&id),
                "server:ping",
                "{\"a\":1}",
                SendOptions::fire_and_forget(),
            )
            .await
            .unwrap();
        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["body"]["commandLine"], "scriptevent server:ping {\"a\":1}");

        dispatcher.subscribe(&id, "PlayerJoin").await.unwrap();
        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["header"]["messagePurpose"], "subscribe");
        assert_eq!(frame["body"]["eventName"], "PlayerJoin");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let server = BridgeServer::new(BridgeConfig::default());
        let (mut first, _) = connect(&server).await;
        let (mut second, _) = connect(&server).await;

        assert_eq!(server.dispatcher().broadcast_message("restart soon").await, 2);
        for peer in [&mut first, &mut second] {
            let frame = peer.recv_json().await.unwrap();
            assert!(frame["body"]["commandLine"].as_str().unwrap().contains("restart soon"));
        }
    }
}
