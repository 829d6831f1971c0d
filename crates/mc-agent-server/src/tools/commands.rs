//! Command tools: raw commands and thin wrappers over common ones

use super::{Params, Tool, ToolContext, ToolDef, command_result};
use async_trait::async_trait;
use mc_agent_core::{BridgeError, Result, ToolOutput};
use serde_json::{Value, json};

const GAMEMODES: [&str; 4] = ["survival", "creative", "adventure", "spectator"];

/// Run any command line; waits for the response by default
pub struct ExecuteCommand;

#[async_trait]
impl Tool for ExecuteCommand {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "execute_command",
            "Execute a Minecraft command and return the game's response. Example: {\"command\": \"time set day\"}",
            json!({
                "command": {"type": "string", "description": "Command line without the leading slash"}
            }),
            &["command"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let command = params.required_str("command")?;
        let outcome = ctx.run_command(&params, command, true).await?;
        Ok(command_result(outcome, format!("Executed: {command}")).into())
    }
}

/// `tp <player> <x> <y> <z> [dimension]`
pub struct TeleportPlayer;

#[async_trait]
impl Tool for TeleportPlayer {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "teleport_player",
            "Teleport a player to coordinates",
            json!({
                "player_name": {"type": "string"},
                "x": {"type": "number"},
                "y": {"type": "number"},
                "z": {"type": "number"},
                "dimension": {"type": "string", "description": "Optional target dimension"}
            }),
            &["player_name", "x", "y", "z"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let player = params.required_str("player_name")?;
        let (x, y, z) = (
            params.required_f64("x")?,
            params.required_f64("y")?,
            params.required_f64("z")?,
        );
        let dimension = params.optional_str("dimension")?;

        let command = match dimension {
            Some(dimension) => format!("tp {player} {x} {y} {z} {dimension}"),
            None => format!("tp {player} {x} {y} {z}"),
        };
        let outcome = ctx.run_command(&params, &command, false).await?;

        let mut message = format!("Teleported {player} to [{x}, {y}, {z}]");
        if let Some(dimension) = dimension {
            message.push_str(&format!(" in {dimension}"));
        }
        Ok(command_result(outcome, message).into())
    }
}

/// `give <player> <item> <amount> <data>`
pub struct GiveItem;

#[async_trait]
impl Tool for GiveItem {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "give_item",
            "Give items to a player",
            json!({
                "player_name": {"type": "string"},
                "item": {"type": "string", "description": "Item id, e.g. diamond_sword"},
                "amount": {"type": "integer", "default": 1},
                "data": {"type": "integer", "default": 0}
            }),
            &["player_name", "item"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let player = params.required_str("player_name")?;
        let item = params.required_str("item")?;
        let amount = params.i64_or("amount", 1)?;
        let data = params.i64_or("data", 0)?;

        let command = format!("give {player} {item} {amount} {data}");
        let outcome = ctx.run_command(&params, &command, false).await?;
        Ok(command_result(outcome, format!("Gave {player} {amount} x {item}")).into())
    }
}

/// `gamerule <rule> <value>`
pub struct SetGameRule;

#[async_trait]
impl Tool for SetGameRule {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "set_game_rule",
            "Set a game rule",
            json!({
                "rule": {"type": "string", "description": "Rule name, e.g. doDaylightCycle"},
                "value": {"type": ["string", "boolean", "integer"]}
            }),
            &["rule", "value"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let rule = params.required_str("rule")?;
        let value = match params.raw("value") {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Bool(_) | Value::Number(_))) => v.to_string(),
            _ => return Err(BridgeError::InvalidParams("missing 'value'".into())),
        };

        let command = format!("gamerule {rule} {value}");
        let outcome = ctx.run_command(&params, &command, false).await?;
        Ok(command_result(outcome, format!("Set game rule {rule} to {value}")).into())
    }
}

/// `gamemode <mode> <player>`
pub struct ChangeGamemode;

#[async_trait]
impl Tool for ChangeGamemode {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "change_gamemode",
            "Change a player's game mode",
            json!({
                "player_name": {"type": "string"},
                "gamemode": {"type": "string", "enum": GAMEMODES}
            }),
            &["player_name", "gamemode"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let player = params.required_str("player_name")?;
        let gamemode = params.required_str("gamemode")?.to_lowercase();
        if !GAMEMODES.contains(&gamemode.as_str()) {
            return Err(BridgeError::InvalidParams(format!(
                "invalid gamemode '{gamemode}', expected one of: {}",
                GAMEMODES.join(", ")
            )));
        }

        let command = format!("gamemode {gamemode} {player}");
        let outcome = ctx.run_command(&params, &command, false).await?;
        Ok(command_result(outcome, format!("Set {player}'s game mode to {gamemode}")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::super::ToolRegistry;
    use super::super::testing::Harness;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_command_waits_for_response() {
        let mut harness = Harness::new().await;
        let ctx = harness.ctx();

        let call = tokio::spawn(async move {
            ToolRegistry::with_builtin_tools()
                .invoke("execute_command", &ctx, json!({"command": "list"}))
                .await
        });
        let line = harness.answer_next(json!({"statusCode": 0, "players": "Steve"})).await;
        assert_eq!(line, "list");

        let result = call.await.unwrap();
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("Executed: list"));
        assert_eq!(result.response, Some(json!({"statusCode": 0, "players": "Steve"})));
        assert!(result.request_id.is_some());
    }

    #[tokio::test]
    async fn test_wrappers_build_command_lines() {
        let mut harness = Harness::new().await;
        let ctx = harness.ctx();
        let registry = ToolRegistry::with_builtin_tools();

        let cases = [
            (
                "teleport_player",
                json!({"player_name": "Steve", "x": 1, "y": 64, "z": -3.5}),
                "tp Steve 1 64 -3.5",
            ),
            (
                "teleport_player",
                json!({"player_name": "Steve", "x": 0, "y": 70, "z": 0, "dimension": "nether"}),
                "tp Steve 0 70 0 nether",
            ),
            (
                "give_item",
                json!({"player_name": "Alex", "item": "diamond", "amount": 5}),
                "give Alex diamond 5 0",
            ),
            (
                "set_game_rule",
                json!({"rule": "doDaylightCycle", "value": false}),
                "gamerule doDaylightCycle false",
            ),
            (
                "change_gamemode",
                json!({"player_name": "Alex", "gamemode": "Creative"}),
                "gamemode creative Alex",
            ),
        ];

        for (tool, params, expected) in cases {
            let result = registry.invoke(tool, &ctx, params).await;
            assert!(result.success, "{tool}: {:?}", result.error);
            assert_eq!(harness.next_command().await, expected);
        }
    }

    #[tokio::test]
    async fn test_invalid_gamemode_sends_nothing() {
        let harness = Harness::new().await;
        let result = ToolRegistry::with_builtin_tools()
            .invoke(
                "change_gamemode",
                &harness.ctx(),
                json!({"player_name": "Alex", "gamemode": "hardcore"}),
            )
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid gamemode"));
        assert!(harness.server.correlation().is_empty());
    }
}
