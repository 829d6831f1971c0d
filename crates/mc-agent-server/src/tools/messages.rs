//! Chat, title and action bar messages

use super::{Params, Tool, ToolContext, ToolDef, command_result};
use async_trait::async_trait;
use mc_agent_core::{Result, ToolOutput};
use serde_json::{Value, json};

/// Escape text for a double-quoted command argument
fn quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `tellraw` to one player or everyone
pub struct SendMessage;

#[async_trait]
impl Tool for SendMessage {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "send_message",
            "Send a chat message to all players or one player",
            json!({
                "message": {"type": "string"},
                "target": {"type": "string", "description": "Player name; everyone when omitted"}
            }),
            &["message"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let message = params.required_str("message")?;
        let target = params.optional_str("target")?;

        let outcome = ctx
            .dispatcher
            .tell_raw(
                ctx.target(&params)?.as_ref(),
                target.unwrap_or("@a"),
                message,
                ctx.options(&params, false)?,
            )
            .await?;

        Ok(command_result(outcome, "Message sent")
            .with_data(json!({ "message": message, "target": target.unwrap_or("all") }))
            .into())
    }
}

/// `title @a times|title|subtitle`
pub struct BroadcastTitle;

#[async_trait]
impl Tool for BroadcastTitle {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "broadcast_title",
            "Show a title (and optional subtitle) to every player",
            json!({
                "title": {"type": "string"},
                "subtitle": {"type": "string"},
                "fade_in": {"type": "integer", "description": "Ticks", "default": 10},
                "stay": {"type": "integer", "description": "Ticks", "default": 70},
                "fade_out": {"type": "integer", "description": "Ticks", "default": 20}
            }),
            &["title"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let title = params.required_str("title")?;
        let subtitle = params.optional_str("subtitle")?;
        let fade_in = params.i64_or("fade_in", 10)?;
        let stay = params.i64_or("stay", 70)?;
        let fade_out = params.i64_or("fade_out", 20)?;

        ctx.run_command(&params, &format!("title @a times {fade_in} {stay} {fade_out}"), false)
            .await?;
        let mut outcome = ctx
            .run_command(&params, &format!("title @a title \"{}\"", quote(title)), false)
            .await?;
        if let Some(subtitle) = subtitle {
            outcome = ctx
                .run_command(&params, &format!("title @a subtitle \"{}\"", quote(subtitle)), false)
                .await?;
        }

        Ok(command_result(outcome, "Title shown")
            .with_data(json!({ "title": title, "subtitle": subtitle }))
            .into())
    }
}

/// `title <target> actionbar`
pub struct SendActionBar;

#[async_trait]
impl Tool for SendActionBar {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "send_action_bar",
            "Show a message above the hotbar",
            json!({
                "message": {"type": "string"},
                "target": {"type": "string", "description": "Player name; everyone when omitted"}
            }),
            &["message"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let params = Params(&params);
        let message = params.required_str("message")?;
        let target = params.optional_str("target")?;

        let command = format!("title {} actionbar \"{}\"", target.unwrap_or("@a"), quote(message));
        let outcome = ctx.run_command(&params, &command, false).await?;

        Ok(command_result(outcome, "Action bar message sent")
            .with_data(json!({ "message": message, "target": target.unwrap_or("all") }))
            .into())
    }
}
