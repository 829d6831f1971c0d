//! # mc-agent-server
//!
//! Tool layer and MCP server for driving Minecraft through the bridge.
//!
//! This crate provides:
//! - The `Tool` trait and `ToolRegistry` with the built-in Minecraft tools
//! - MCP JSON-RPC protocol handling
//! - The stdio transport

pub mod mcp;
pub mod tools;
pub mod transport;

pub use tools::{Tool, ToolContext, ToolDef, ToolRegistry};

use mc_agent_core::{Result, error_codes};
use mc_bridge::CommandDispatcher;
use mcp::{
    CallToolResult, Content, InitializeParams, InitializeResult, ReadParams, Request, Resource,
    ResourceContents, Response, RpcId, ServerCapabilities, ServerInfo, ToolCallParams,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

/// Protocol version answered when the client does not ask for one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

const CONNECTIONS_URI: &str = "minecraft://connections";
const TOOLS_URI: &str = "minecraft://tools";
const JSON_MIME: &str = "application/json";

const RESOURCES: [Resource; 2] = [
    Resource {
        uri: CONNECTIONS_URI,
        name: "Connections",
        description: "Connected Minecraft clients",
        mime_type: JSON_MIME,
    },
    Resource {
        uri: TOOLS_URI,
        name: "Tools",
        description: "Registered tools and their input schemas",
        mime_type: JSON_MIME,
    },
];

/// MCP server over the bridge's tool registry
pub struct McpServer {
    info: ServerInfo,
    dispatcher: Arc<CommandDispatcher>,
    tools: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        dispatcher: Arc<CommandDispatcher>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            dispatcher,
            tools,
        }
    }

    /// Run the server on stdio
    pub async fn run_stdio(self: Arc<Self>) -> Result<()> {
        transport::stdio::run(self).await
    }

    /// Handle one request; notifications get no response
    pub async fn handle(&self, request: Request) -> Option<Response> {
        let Some(id) = request.id.clone() else {
            debug!("Notification: {}", request.method);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "ping" => Response::success(id, json!({})),
            "tools/list" => {
                Response::success(id, json!({ "tools": self.tools.definitions() }))
            }
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => self.handle_resources_list(id),
            "resources/read" => self.handle_resources_read(id, request.params),
            _ => Response::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: RpcId, params: Value) -> Response {
        let params: InitializeParams = match mcp::parse_params(params) {
            Ok(p) => p,
            Err(e) => return Response::from_error(id, &e),
        };

        if let Some(client) = &params.client_info {
            info!("MCP client: {} {}", client.name, client.version);
        }

        let result = InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities::default(),
            server_info: self.info.clone(),
        };
        Response::result(id, &result)
    }

    async fn handle_tools_call(&self, id: RpcId, params: Value) -> Response {
        let params: ToolCallParams = match mcp::parse_params(params) {
            Ok(p) => p,
            Err(e) => return Response::from_error(id, &e),
        };

        let ctx = ToolContext::new(self.dispatcher.clone(), None);
        let result = self.tools.invoke(&params.name, &ctx, params.arguments).await;
        let text = match serde_json::to_string(&result) {
            Ok(text) => text,
            Err(e) => return Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        };

        Response::result(
            id,
            &CallToolResult {
                content: vec![Content::Text { text }],
                is_error: !result.success,
            },
        )
    }

    fn handle_resources_list(&self, id: RpcId) -> Response {
        Response::success(id, json!({ "resources": RESOURCES }))
    }

    fn handle_resources_read(&self, id: RpcId, params: Value) -> Response {
        let params: ReadParams = match mcp::parse_params(params) {
            Ok(p) => p,
            Err(e) => return Response::from_error(id, &e),
        };

        let content = match params.uri.as_str() {
            CONNECTIONS_URI => json!({ "connections": self.dispatcher.registry().snapshot() }),
            TOOLS_URI => json!({ "tools": self.tools.definitions() }),
            _ => {
                return Response::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Unknown resource: {}", params.uri),
                );
            }
        };

        let contents = [ResourceContents {
            uri: params.uri,
            mime_type: JSON_MIME,
            text: content.to_string(),
        }];
        Response::success(id, json!({ "contents": contents }))
    }
}
