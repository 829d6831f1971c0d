//! In-game chat commands
//!
//! Players drive the agent from the chat box with `#`-prefixed messages.
//! Replies go back to the connection the message came from.

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, ChatModel, SentenceBuffer};
use async_trait::async_trait;
use futures::StreamExt;
use mc_agent_core::{ConnectionId, Result};
use mc_agent_server::{ToolContext, ToolRegistry};
use mc_bridge::{CommandDispatcher, CommandReply, EventHandler, SendOptions};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Messages kept per connection (user and assistant turns)
const MAX_HISTORY: usize = 20;

const HELP: &[&str] = &[
    "#help - show this list",
    "#run <command> - run a game command",
    "#tools - list tools",
    "#tool <name> key=value ... - invoke a tool",
    "#gpt <prompt> - ask the assistant",
    "#gpt clear - forget the conversation",
];

/// Event handler for `#` chat commands
pub struct ChatCommandHandler {
    dispatcher: Arc<CommandDispatcher>,
    tools: Arc<ToolRegistry>,
    model: Option<Arc<dyn ChatModel>>,
    system_prompt: String,
    enable_history: bool,
    history: Mutex<HashMap<ConnectionId, Vec<ChatMessage>>>,
}

impl ChatCommandHandler {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        tools: Arc<ToolRegistry>,
        model: Option<Arc<dyn ChatModel>>,
        config: &LlmConfig,
    ) -> Self {
        Self {
            dispatcher,
            tools,
            model,
            system_prompt: config.system_prompt.clone(),
            enable_history: config.enable_history,
            history: Mutex::new(HashMap::new()),
        }
    }

    async fn reply(&self, connection_id: &ConnectionId, text: &str) -> Result<()> {
        self.dispatcher
            .send_game_message(Some(connection_id), text)
            .await
            .map(|_| ())
    }

    async fn run_command(&self, connection_id: &ConnectionId, command: &str) -> Result<()> {
        if command.is_empty() {
            return self.reply(connection_id, "Usage: #run <command>").await;
        }

        let text = match self
            .dispatcher
            .send_command(Some(connection_id), command, SendOptions::wait())
            .await
        {
            Ok(outcome) => match outcome.reply {
                CommandReply::Response(body) => body
                    .get("statusMessage")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Executed: {command}")),
                CommandReply::TimedOut => format!("No response to: {command}"),
                other => format!("Command {}: {command}", other.kind()),
            },
            Err(e) => format!("Command failed: {e}"),
        };
        self.reply(connection_id, &text).await
    }

    async fn run_tool(&self, connection_id: &ConnectionId, args: &str) -> Result<()> {
        let tokens = tokenize(args);
        let Some((name, rest)) = tokens.split_first() else {
            return self
                .reply(connection_id, "Usage: #tool <name> key=value ...")
                .await;
        };

        let params = match parse_params(rest) {
            Ok(params) => params,
            Err(e) => return self.reply(connection_id, &e).await,
        };

        let ctx = ToolContext::new(self.dispatcher.clone(), Some(connection_id.clone()));
        let result = self.tools.invoke(name, &ctx, Value::Object(params)).await;
        let text = if result.success {
            result
                .message
                .unwrap_or_else(|| format!("Tool {name} succeeded"))
        } else {
            format!(
                "Tool {name} failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )
        };
        self.reply(connection_id, &text).await
    }

    async fn chat(&self, connection_id: &ConnectionId, sender: &str, prompt: &str) -> Result<()> {
        match prompt {
            "" => return self.reply(connection_id, "Usage: #gpt <prompt>").await,
            "clear" => {
                self.history.lock().remove(connection_id);
                return self.reply(connection_id, "Conversation cleared").await;
            }
            _ => {}
        }

        let Some(model) = &self.model else {
            return self
                .reply(connection_id, "Chat is disabled: no API key configured")
                .await;
        };

        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        if self.enable_history {
            if let Some(past) = self.history.lock().get(connection_id) {
                messages.extend(past.iter().cloned());
            }
        }
        messages.push(ChatMessage::user(prompt));

        info!(connection = %connection_id, "{} asked the assistant", sender);
        let mut stream = match model.stream_chat(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(connection = %connection_id, "Chat request failed: {}", e);
                return self.reply(connection_id, &format!("Assistant error: {e}")).await;
            }
        };

        let mut sentences = SentenceBuffer::new();
        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(connection = %connection_id, "Chat stream failed: {}", e);
                    self.reply(connection_id, &format!("Assistant error: {e}"))
                        .await?;
                    break;
                }
            };
            if !chunk.reasoning_content.is_empty() {
                debug!(connection = %connection_id, "reasoning: {}", chunk.reasoning_content);
            }
            answer.push_str(&chunk.content);
            for sentence in sentences.push(&chunk.content) {
                self.reply(connection_id, &sentence).await?;
            }
        }
        if let Some(rest) = sentences.finish() {
            self.reply(connection_id, &rest).await?;
        }

        if self.enable_history && !answer.is_empty() {
            self.remember(connection_id, prompt, answer);
        }
        Ok(())
    }

    /// Record a finished exchange. Conversations of connections that have
    /// gone away are dropped, and each one keeps only its latest turns.
    fn remember(&self, connection_id: &ConnectionId, prompt: &str, answer: String) {
        let registry = self.dispatcher.registry();
        let mut history = self.history.lock();
        history.retain(|id, _| id == connection_id || registry.lookup(id).is_some());

        let past = history.entry(connection_id.clone()).or_default();
        past.push(ChatMessage::user(prompt));
        past.push(ChatMessage::assistant(answer));
        if past.len() > MAX_HISTORY {
            let excess = past.len() - MAX_HISTORY;
            past.drain(..excess);
        }
    }
}

#[async_trait]
impl EventHandler for ChatCommandHandler {
    async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event_name: String,
        body: Value,
    ) -> Result<()> {
        if event_name != "PlayerMessage" {
            return Ok(());
        }
        let sender = body.get("sender").and_then(Value::as_str).unwrap_or("?");
        let message = body.get("message").and_then(Value::as_str).unwrap_or("");
        info!(connection = %connection_id, "<{}> {}", sender, message);

        let Some(command) = message.trim().strip_prefix('#') else {
            return Ok(());
        };
        let (verb, rest) = command
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((command, ""));

        match verb {
            "help" => {
                for line in HELP {
                    self.reply(&connection_id, line).await?;
                }
                Ok(())
            }
            "run" => self.run_command(&connection_id, rest).await,
            "tools" => {
                let names = self.tools.names().join(", ");
                self.reply(&connection_id, &format!("Tools: {names}")).await
            }
            "tool" => self.run_tool(&connection_id, rest).await,
            "gpt" => self.chat(&connection_id, sender, rest).await,
            _ => {
                self.reply(&connection_id, &format!("Unknown command #{verb}, try #help"))
                    .await
            }
        }
    }
}

/// Split on whitespace outside quotes, braces and brackets
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for ch in input.chars() {
        match ch {
            '"' | '\'' if quote == Some(ch) => {
                quote = None;
                current.push(ch);
            }
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                current.push(ch);
            }
            '{' | '[' if quote.is_none() => {
                depth += 1;
                current.push(ch);
            }
            '}' | ']' if quote.is_none() => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c.is_whitespace() && quote.is_none() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// `key=value` pairs; values are JSON when they parse, else bare strings
fn parse_params(tokens: &[String]) -> std::result::Result<Map<String, Value>, String> {
    let mut params = Map::new();
    for token in tokens {
        let Some((key, raw)) = token.split_once('=') else {
            return Err(format!("Expected key=value, got {token}"));
        };
        params.insert(key.to_string(), parse_value(raw));
    }
    Ok(params)
}

fn parse_value(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str(raw) {
        return value;
    }
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .unwrap_or(raw);
    Value::String(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatChunk, ChunkStream};
    use futures::stream;
    use mc_agent_core::BridgeError;
    use mc_bridge::transport::memory::{self, MemoryPeer};
    use mc_bridge::{BridgeConfig, BridgeServer};
    use serde_json::json;

    /// Replies with fixed chunks and records what it was asked
    struct ScriptedModel {
        chunks: Vec<&'static str>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChunkStream> {
            self.seen.lock().push(messages.to_vec());
            let chunks: Vec<Result<ChatChunk>> = self
                .chunks
                .iter()
                .map(|c| {
                    Ok(ChatChunk {
                        reasoning_content: String::new(),
                        content: c.to_string(),
                    })
                })
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
    }

    struct Fixture {
        _server: BridgeServer,
        handler: ChatCommandHandler,
        peer: MemoryPeer,
        connection_id: ConnectionId,
    }

    impl Fixture {
        async fn new(model: Option<Arc<dyn ChatModel>>) -> Self {
            let server = BridgeServer::new(BridgeConfig::default());
            let (reader, writer, mut peer) = memory::pair();
            let _session = server.attach(reader, writer, None);
            let welcome = peer.recv_json().await.unwrap();
            let connection_id = ConnectionId::from(welcome["client_id"].as_str().unwrap());
            let _subscribe = peer.recv_json().await.unwrap();

            let handler = ChatCommandHandler::new(
                server.dispatcher(),
                Arc::new(ToolRegistry::with_builtin_tools()),
                model,
                &LlmConfig::default(),
            );
            Self {
                _server: server,
                handler,
                peer,
                connection_id,
            }
        }

        async fn say(&self, message: &str) -> Result<()> {
            self.handler
                .handle_event(
                    self.connection_id.clone(),
                    "PlayerMessage".into(),
                    json!({ "sender": "Steve", "message": message }),
                )
                .await
        }

        async fn next_command(&mut self) -> Value {
            self.peer.recv_json().await.unwrap()
        }

        /// Text of the next `tellraw` chat reply
        async fn next_reply(&mut self) -> String {
            let frame = self.next_command().await;
            let line = frame["body"]["commandLine"].as_str().unwrap();
            let rawtext = line.strip_prefix("tellraw @a ").unwrap();
            let value: Value = serde_json::from_str(rawtext).unwrap();
            value["rawtext"][0]["text"].as_str().unwrap().to_string()
        }
    }

    #[test]
    fn test_tokenize_respects_quotes_and_braces() {
        assert_eq!(
            tokenize(r#"send_message message="hello there" data={"a": [1, 2]}  x=1"#),
            vec![
                "send_message",
                r#"message="hello there""#,
                r#"data={"a": [1, 2]}"#,
                "x=1"
            ]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_param_values() {
        let tokens: Vec<String> = ["a=1", "b=true", "c=Steve", "d='two words'", r#"e={"k":2}"#]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let params = parse_params(&tokens).unwrap();
        assert_eq!(
            Value::Object(params),
            json!({ "a": 1, "b": true, "c": "Steve", "d": "two words", "e": {"k": 2} })
        );

        let err = parse_params(&["oops".to_string()]).unwrap_err();
        assert!(err.contains("oops"));
    }

    #[tokio::test]
    async fn test_plain_chat_is_ignored() {
        let mut fx = Fixture::new(None).await;
        fx.say("hello everyone").await.unwrap();
        fx.handler
            .handle_event(fx.connection_id.clone(), "PlayerJoin".into(), json!({}))
            .await
            .unwrap();

        fx.peer.hang_up();
        assert!(fx.peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_help_and_unknown() {
        let mut fx = Fixture::new(None).await;
        fx.say("#help").await.unwrap();
        for line in HELP {
            assert_eq!(fx.next_reply().await, format!("§a{line}"));
        }

        fx.say("#dance").await.unwrap();
        assert_eq!(fx.next_reply().await, "§aUnknown command #dance, try #help");
    }

    #[tokio::test]
    async fn test_run_relays_status_message() {
        let mut fx = Fixture::new(None).await;
        let Fixture {
            handler,
            peer,
            connection_id,
            ..
        } = &mut fx;
        let say = handler.handle_event(
            connection_id.clone(),
            "PlayerMessage".into(),
            json!({ "sender": "Steve", "message": "#run time set day" }),
        );

        let peer = async {
            let frame = peer.recv_json().await.unwrap();
            assert_eq!(frame["body"]["commandLine"], "time set day");
            peer.send(
                json!({
                    "header": {"requestId": frame["header"]["requestId"], "messagePurpose": "commandResponse"},
                    "body": {"statusCode": 0, "statusMessage": "Set the time to 1000"},
                })
                .to_string(),
            );
            let reply = peer.recv_json().await.unwrap();
            reply["body"]["commandLine"].as_str().unwrap().to_string()
        };

        let (said, reply) = tokio::join!(say, peer);
        said.unwrap();
        assert!(reply.contains("§aSet the time to 1000"));
    }

    #[tokio::test]
    async fn test_tool_invocation() {
        let mut fx = Fixture::new(None).await;
        fx.say("#tool give_item player_name=Steve item=diamond_sword amount=3")
            .await
            .unwrap();
        let give = fx.next_command().await;
        assert_eq!(give["body"]["commandLine"], "give Steve diamond_sword 3 0");
        assert_eq!(fx.next_reply().await, "§aGave Steve 3 x diamond_sword");

        fx.say("#tool give_item item=stone").await.unwrap();
        let reply = fx.next_reply().await;
        assert!(reply.starts_with("§aTool give_item failed:"), "{reply}");

        fx.say("#tools").await.unwrap();
        let reply = fx.next_reply().await;
        assert!(reply.contains("give_item") && reply.contains("spawn_entity"));
    }

    #[tokio::test]
    async fn test_gpt_without_model() {
        let mut fx = Fixture::new(None).await;
        fx.say("#gpt hi").await.unwrap();
        assert_eq!(
            fx.next_reply().await,
            "§aChat is disabled: no API key configured"
        );
    }

    #[tokio::test]
    async fn test_gpt_relays_sentences_and_keeps_history() {
        let model = Arc::new(ScriptedModel {
            chunks: vec!["Hi Ste", "ve! Diamonds are ", "deep", " underground"],
            seen: Mutex::new(Vec::new()),
        });
        let mut fx = Fixture::new(Some(model.clone() as Arc<dyn ChatModel>)).await;

        fx.say("#gpt where are diamonds").await.unwrap();
        assert_eq!(fx.next_reply().await, "§aHi Steve!");
        assert_eq!(fx.next_reply().await, "§aDiamonds are deep underground");

        fx.say("#gpt thanks").await.unwrap();
        {
            let seen = model.seen.lock();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].len(), 4);
            assert_eq!(seen[1][0].role, "system");
            assert_eq!(seen[1][1], ChatMessage::user("where are diamonds"));
            assert_eq!(
                seen[1][2],
                ChatMessage::assistant("Hi Steve! Diamonds are deep underground")
            );
        }

        fx.say("#gpt clear").await.unwrap();
        assert!(fx.handler.history.lock().get(&fx.connection_id).is_none());
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_forgets_departed_connections() {
        let model = Arc::new(ScriptedModel {
            chunks: vec!["ok"],
            seen: Mutex::new(Vec::new()),
        });
        let mut fx = Fixture::new(Some(model as Arc<dyn ChatModel>)).await;

        let gone = ConnectionId::from("departed");
        fx.handler
            .history
            .lock()
            .insert(gone.clone(), vec![ChatMessage::user("old")]);

        for i in 0..MAX_HISTORY {
            fx.say(&format!("#gpt question {i}")).await.unwrap();
            assert_eq!(fx.next_reply().await, "§aok");
        }

        let history = fx.handler.history.lock();
        assert!(!history.contains_key(&gone));
        let past = &history[&fx.connection_id];
        assert_eq!(past.len(), MAX_HISTORY);
        assert_eq!(past[0], ChatMessage::user(format!("question {}", MAX_HISTORY / 2)));
        assert_eq!(past[MAX_HISTORY - 1], ChatMessage::assistant("ok"));
    }

    #[tokio::test]
    async fn test_gpt_stream_error_is_reported() {
        struct Broken;

        #[async_trait]
        impl ChatModel for Broken {
            async fn stream_chat(&self, _messages: &[ChatMessage]) -> Result<ChunkStream> {
                Err(BridgeError::Protocol("LLM API returned 401".into()))
            }
        }

        let mut fx = Fixture::new(Some(Arc::new(Broken) as Arc<dyn ChatModel>)).await;
        fx.say("#gpt hi").await.unwrap();
        let reply = fx.next_reply().await;
        assert!(reply.contains("401"));
        assert!(fx.handler.history.lock().is_empty());
    }
}
