//! Minecraft agent server
//!
//! Listens for Minecraft WebSocket clients (`/connect host:port` in game),
//! answers `#` chat commands, and optionally serves the tool set over MCP
//! on stdin/stdout.

mod chat;
mod config;
mod llm;
mod logging;

use anyhow::{Context, Result};
use chat::ChatCommandHandler;
use clap::Parser;
use config::{AppConfig, Cli};
use llm::{ChatModel, OpenAiChat};
use mc_agent_server::{McpServer, ToolRegistry};
use mc_bridge::BridgeServer;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load(&cli.config)?;
    let mut config = loaded.config;
    config.apply_cli(&cli);

    logging::init(&config.logging)?;
    if !loaded.from_file {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }

    info!("{} v{} starting", config.agent.name, config.agent.version);

    let server = BridgeServer::new(config.server.clone());
    let dispatcher = server.dispatcher();
    let tools = Arc::new(ToolRegistry::with_builtin_tools());

    let model: Option<Arc<dyn ChatModel>> = match &config.llm.api_key {
        Some(_) => Some(Arc::new(OpenAiChat::new(&config.llm)?) as Arc<dyn ChatModel>),
        None => {
            warn!("No API key configured, #gpt is disabled");
            None
        }
    };
    server.events().set_handler(Arc::new(ChatCommandHandler::new(
        dispatcher.clone(),
        tools.clone(),
        model,
        &config.llm,
    )));

    let handle = server.start().await.context("starting WebSocket bridge")?;
    info!(
        "Waiting for Minecraft: run `/connect {}` in game",
        handle.local_addr()
    );

    if config.mcp.enabled {
        let mcp = Arc::new(McpServer::new(
            config.agent.name.clone(),
            config.agent.version.clone(),
            dispatcher,
            tools,
        ));
        info!("Serving MCP on stdio");
        tokio::select! {
            result = mcp.run_stdio() => match result {
                Ok(()) => info!("MCP client disconnected"),
                Err(e) => error!("MCP server failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        info!("Interrupted");
    }

    handle.shutdown().await;
    Ok(())
}
