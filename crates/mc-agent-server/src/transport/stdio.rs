//! stdio transport for MCP JSON-RPC
//!
//! One JSON message per line. Requests are handled concurrently (a tool call
//! may wait seconds for the game); responses go out through a single writer
//! in completion order.

use crate::McpServer;
use crate::mcp::{Request, Response};
use mc_agent_core::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Run the MCP server on stdin/stdout
pub async fn run(server: Arc<McpServer>) -> Result<()> {
    info!("MCP server starting on stdio");
    serve(server, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve line-delimited JSON-RPC until the input ends and every request is answered
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let mut in_flight = JoinSet::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    if let Some(request) = parse_line(&line) {
                        let server = server.clone();
                        let tx = tx.clone();
                        in_flight.spawn(async move {
                            if let Some(response) = server.handle(request).await {
                                let _ = tx.send(response);
                            }
                        });
                    }
                }
                None => {
                    info!("Client disconnected (EOF)");
                    input_open = false;
                }
            },
            Some(response) = rx.recv() => write_response(&mut writer, &response).await?,
            Some(joined) = in_flight.join_next() => {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }
        }

        if !input_open && in_flight.is_empty() {
            break;
        }
    }

    while let Ok(response) = rx.try_recv() {
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

fn parse_line(line: &str) -> Option<Request> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    debug!("Received: {}", trimmed);

    match serde_json::from_str(trimmed) {
        Ok(request) => Some(request),
        Err(e) => {
            error!("Failed to parse request: {}", e);
            None
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let json = serde_json::to_string(response)?;
    debug!("Sending: {}", json);

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
