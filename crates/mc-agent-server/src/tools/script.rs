//! Script API tools
//!
//! These send `scriptevent` commands that a behavior pack on the game side
//! listens for.

use super::{Params, Tool, ToolContext, ToolDef, command_result};
use async_trait::async_trait;
use mc_agent_core::{BridgeError, Result, ToolOutput};
use mc_bridge::CommandOutcome;
use serde_json::{Map, Value, json};

async fn send_event(
    ctx: &ToolContext,
    params: &Params<'_>,
    event_id: &str,
    data: &Value,
) -> Result<CommandOutcome> {
    let content = match data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    ctx.dispatcher
        .send_script_event(
            ctx.target(params)?.as_ref(),
            event_id,
            &content,
            ctx.options(params, false)?,
        )
        .await
}

fn position(params: &Params<'_>) -> Result<Value> {
    Ok(json!({
        "x": params.required_f64("x")?,
        "y": params.required_f64("y")?,
        "z": params.required_f64("z")?,
    }))
}

/// `scriptevent <event_id> <data>`
pub struct SendScriptEvent;

#[async_trait]
impl Tool for SendScriptEvent {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "send_script_event",
            "Send a script event to the game's behavior pack",
            json!({
                "event_id": {"type": "string", "description": "Namespaced id, e.g. server:ping"},
                "data": {"description": "Event payload; objects are sent as JSON"}
            }),
            &["event_id"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let event_id = params.required_str("event_id")?;
        if !event_id.contains(':') {
            return Err(BridgeError::InvalidParams(format!(
                "event_id '{event_id}' must be namespaced (namespace:name)"
            )));
        }
        let data = params.raw("data").cloned().unwrap_or_else(|| json!({}));

        let outcome = send_event(ctx, &params, event_id, &data).await?;
        Ok(command_result(outcome, format!("Sent script event {event_id}"))
            .with_data(json!({ "event_id": event_id, "data": data }))
            .into())
    }
}

/// `server:setBlock` script event
pub struct SetBlock;

#[async_trait]
impl Tool for SetBlock {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "set_block",
            "Place a block at coordinates",
            json!({
                "x": {"type": "integer"},
                "y": {"type": "integer"},
                "z": {"type": "integer"},
                "block_type": {"type": "string", "description": "Block id, e.g. minecraft:stone"},
                "block_data": {"type": "object", "description": "Optional block states"}
            }),
            &["x", "y", "z", "block_type"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let (x, y, z) = (
            params.required_i64("x")?,
            params.required_i64("y")?,
            params.required_i64("z")?,
        );
        let block_type = params.required_str("block_type")?;

        let mut data = Map::new();
        data.insert("position".into(), json!({ "x": x, "y": y, "z": z }));
        data.insert("blockType".into(), json!(block_type));
        if let Some(block_data) = params.optional::<Map<String, Value>>("block_data")? {
            if !block_data.is_empty() {
                data.insert("blockData".into(), Value::Object(block_data));
            }
        }

        let data = Value::Object(data);
        let outcome = send_event(ctx, &params, "server:setBlock", &data).await?;
        Ok(command_result(outcome, format!("Placed {block_type} at [{x}, {y}, {z}]"))
            .with_data(data)
            .into())
    }
}

/// `server:spawnEntity` script event
pub struct SpawnEntity;

#[async_trait]
impl Tool for SpawnEntity {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "spawn_entity",
            "Spawn an entity at coordinates",
            json!({
                "entity_type": {"type": "string", "description": "Entity id, e.g. minecraft:pig"},
                "x": {"type": "number"},
                "y": {"type": "number"},
                "z": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }),
            &["entity_type", "x", "y", "z"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let entity_type = params.required_str("entity_type")?;
        let position = position(&params)?;
        let tags = params.optional::<Vec<String>>("tags")?.unwrap_or_default();

        let mut data = Map::new();
        data.insert("entityType".into(), json!(entity_type));
        data.insert("position".into(), position.clone());
        if !tags.is_empty() {
            data.insert("tags".into(), json!(tags));
        }

        let data = Value::Object(data);
        let outcome = send_event(ctx, &params, "server:spawnEntity", &data).await?;

        let mut message = format!(
            "Spawned {entity_type} at [{}, {}, {}]",
            position["x"], position["y"], position["z"]
        );
        if !tags.is_empty() {
            message.push_str(&format!(" with tags {}", tags.join(", ")));
        }
        Ok(command_result(outcome, message).with_data(data).into())
    }
}
