//! Application configuration
//!
//! A JSON file provides the base values; command-line flags (with environment
//! fallbacks) override them.

use clap::Parser;
use mc_agent_core::{BridgeError, Result};
use mc_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default packet log location in `--debug` mode
pub const DEBUG_PACKET_LOG: &str = "logs/packets.jsonl";

/// Minecraft agent server: WebSocket bridge, in-game chat commands and MCP on stdio
#[derive(Parser, Debug)]
#[command(name = "mc-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short, env = "MC_AGENT_CONFIG", default_value = "config/default.json")]
    pub config: PathBuf,

    /// WebSocket listen address
    #[arg(long, env = "MC_AGENT_HOST")]
    pub host: Option<String>,

    /// WebSocket listen port
    #[arg(long, short, env = "MC_AGENT_PORT")]
    pub port: Option<u16>,

    /// Serve MCP JSON-RPC on stdin/stdout
    #[arg(long)]
    pub mcp: bool,

    /// Debug logging and raw packet capture
    #[arg(long)]
    pub debug: bool,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "MC_AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: BridgeConfig,
    pub agent: AgentConfig,
    pub mcp: McpConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "mc-agent".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub system_prompt: String,
    pub enable_history: bool,
    pub temperature: f32,
    /// Only ever taken from the flag/environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: "You are a helpful assistant inside a Minecraft world. Keep answers short."
                .into(),
            enable_history: true,
            temperature: 0.7,
            api_key: None,
        }
    }
}

/// Outcome of reading the configuration file
#[derive(Debug)]
pub struct Loaded {
    pub config: AppConfig,
    /// False when the file did not exist and defaults were used
    pub from_file: bool,
}

impl AppConfig {
    /// Read a JSON config file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Loaded> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Loaded {
                    config: AppConfig::default(),
                    from_file: false,
                });
            }
            Err(e) => {
                return Err(BridgeError::Config(format!("{}: {}", path.display(), e)));
            }
        };

        let config = serde_json::from_str(&text)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Loaded {
            config,
            from_file: true,
        })
    }

    /// Apply command-line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if cli.mcp {
            self.mcp.enabled = true;
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
        if cli.debug {
            self.logging.level = "debug".into();
            if self.server.packet_log.is_none() {
                self.server.packet_log = Some(PathBuf::from(DEBUG_PACKET_LOG));
            }
        }
        if let Some(key) = cli.api_key.as_ref().filter(|k| !k.is_empty()) {
            self.llm.api_key = Some(key.clone());
        }
    }
}
