//! Tool layer
//!
//! A tool is a named async operation over the bridge. Tools answer with a
//! structured [`ToolResult`] or a plain JSON mapping; [`ToolRegistry::invoke`]
//! normalizes both so callers always get the same shape.

mod commands;
mod messages;
mod params;
mod script;

pub use commands::{ChangeGamemode, ExecuteCommand, GiveItem, SetGameRule, TeleportPlayer};
pub use messages::{BroadcastTitle, SendActionBar, SendMessage};
pub use params::Params;
pub use script::{SendScriptEvent, SetBlock, SpawnEntity};

use async_trait::async_trait;
use mc_agent_core::{BridgeError, ConnectionId, Result, ToolOutput, ToolResult};
use mc_bridge::{CommandDispatcher, CommandOutcome, CommandReply, SendOptions};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tool definition for MCP tools/list
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDef {
    /// Definition whose schema also accepts the common `client_id` and
    /// `wait_response` parameters
    pub fn new(name: &str, description: &str, properties: Value, required: &[&str]) -> Self {
        let mut properties = match properties {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        properties.insert(
            "client_id".into(),
            json!({
                "type": "string",
                "description": "Target connection id; defaults to the first connected client"
            }),
        );
        properties.insert(
            "wait_response".into(),
            json!({
                "type": "boolean",
                "description": "Wait for the game's command response"
            }),
        );

        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Everything a tool needs to reach the game
#[derive(Clone)]
pub struct ToolContext {
    pub dispatcher: Arc<CommandDispatcher>,
    /// Connection the call came from or was aimed at, passed through unchanged
    pub connection_id: Option<ConnectionId>,
}

impl ToolContext {
    pub fn new(dispatcher: Arc<CommandDispatcher>, connection_id: Option<ConnectionId>) -> Self {
        Self {
            dispatcher,
            connection_id,
        }
    }

    /// Target for this call: an explicit `client_id` parameter wins
    pub fn target(&self, params: &Params<'_>) -> Result<Option<ConnectionId>> {
        Ok(params
            .optional_str("client_id")?
            .map(ConnectionId::from)
            .or_else(|| self.connection_id.clone()))
    }

    /// Send options from the `wait_response` parameter
    pub fn options(&self, params: &Params<'_>, default_wait: bool) -> Result<SendOptions> {
        let wait = params.bool_or("wait_response", default_wait)?;
        Ok(SendOptions::default().with_wait(wait))
    }

    /// Send a command on behalf of a tool, honouring `client_id` and `wait_response`
    pub async fn run_command(
        &self,
        params: &Params<'_>,
        command_line: &str,
        default_wait: bool,
    ) -> Result<CommandOutcome> {
        let target = self.target(params)?;
        let options = self.options(params, default_wait)?;
        self.dispatcher
            .send_command(target.as_ref(), command_line, options)
            .await
    }
}

/// A named, parameterized operation
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput>;
}

/// Successful result for an accepted command
pub fn command_result(outcome: CommandOutcome, message: impl Into<String>) -> ToolResult {
    let mut result = ToolResult::success(message);
    result.request_id = Some(outcome.request_id.to_string());
    match outcome.reply {
        CommandReply::Response(body) => result.response = Some(body),
        CommandReply::NotAwaited => {}
        other => result.data = Some(json!({ "reply": other.kind() })),
    }
    result
}

/// Name-to-implementation lookup
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in Minecraft tool
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(ExecuteCommand);
        registry.register(TeleportPlayer);
        registry.register(GiveItem);
        registry.register(SetGameRule);
        registry.register(ChangeGamemode);
        registry.register(SendMessage);
        registry.register(BroadcastTitle);
        registry.register(SendActionBar);
        registry.register(SendScriptEvent);
        registry.register(SetBlock);
        registry.register(SpawnEntity);
        registry
    }

    /// Register a tool under its definition name, replacing any previous one
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.definition().name;
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool. Never fails: unknown tools and execution errors become
    /// `success = false` results.
    pub async fn invoke(&self, name: &str, ctx: &ToolContext, params: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!("Unknown tool: {}", name);
            return ToolResult::failure(BridgeError::ToolNotFound(name.to_string()).to_string());
        };

        debug!(tool = name, "Invoking tool with {}", params);
        match tool.execute(ctx, params).await {
            Ok(output) => output.into_result(),
            Err(e) => {
                warn!(tool = name, "Tool failed: {}", e);
                ToolResult::failure(e.to_string())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    struct PlainTool;

    #[async_trait]
    impl Tool for PlainTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("plain", "Returns a plain mapping", json!({}), &[])
        }

        async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
            if params.get("fail").is_some() {
                return Err(BridgeError::InvalidParams("asked to fail".into()));
            }
            Ok(ToolOutput::Plain(json!({"players": 3})))
        }
    }

    #[test]
    fn test_builtin_tools_are_listed() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(registry.len(), 11);
        for name in [
            "execute_command",
            "teleport_player",
            "give_item",
            "set_game_rule",
            "change_gamemode",
            "send_message",
            "broadcast_title",
            "send_action_bar",
            "send_script_event",
            "set_block",
            "spawn_entity",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }

        for def in registry.definitions() {
            let props = &def.input_schema["properties"];
            assert!(props.get("client_id").is_some());
            assert!(props.get("wait_response").is_some());
        }
    }

    #[tokio::test]
    async fn test_invoke_normalizes_every_shape() {
        let harness = Harness::new().await;
        let mut registry = ToolRegistry::new();
        registry.register(PlainTool);
        let ctx = harness.ctx();

        let plain = registry.invoke("plain", &ctx, json!({})).await;
        assert!(plain.success);
        assert_eq!(plain.data, Some(json!({"players": 3})));

        let failed = registry.invoke("plain", &ctx, json!({"fail": true})).await;
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("asked to fail"));

        let missing = registry.invoke("nope", &ctx, json!({})).await;
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_no_connection_is_a_failure_result() {
        let server = mc_bridge::BridgeServer::new(mc_bridge::BridgeConfig::default());
        let ctx = ToolContext::new(server.dispatcher(), None);
        let registry = ToolRegistry::with_builtin_tools();

        let result = registry
            .invoke("execute_command", &ctx, json!({"command": "say hi"}))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No active connection"));
    }

    #[tokio::test]
    async fn test_client_id_overrides_context_target() {
        let harness = Harness::new().await;
        let ctx = ToolContext::new(harness.server.dispatcher(), Some(ConnectionId::from("stale")));
        let registry = ToolRegistry::with_builtin_tools();

        let result = registry
            .invoke(
                "execute_command",
                &ctx,
                json!({"command": "say hi", "wait_response": false}),
            )
            .await;
        assert_eq!(result.error.as_deref(), Some("Connection not found: stale"));

        let result = registry
            .invoke(
                "execute_command",
                &ctx,
                json!({
                    "command": "say hi",
                    "wait_response": false,
                    "client_id": harness.connection_id
                }),
            )
            .await;
        assert!(result.success);
        assert!(result.request_id.is_some());
    }
}
