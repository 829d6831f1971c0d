//! Raw frame side channel
//!
//! Records every inbound and outbound frame as one JSON line. Recording never
//! blocks the caller: when the writer falls behind, frames are dropped.

use mc_agent_core::{ConnectionId, Result};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const QUEUE_DEPTH: usize = 1024;

/// Frame direction relative to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Serialize)]
struct PacketRecord {
    ts: String,
    direction: Direction,
    connection: ConnectionId,
    frame: String,
}

/// Append-only JSON-lines frame log
#[derive(Debug)]
pub struct PacketLogger {
    tx: mpsc::Sender<PacketRecord>,
}

impl PacketLogger {
    /// Open (append) the log file and spawn its writer task.
    ///
    /// The task ends once every logger handle is dropped.
    pub async fn open(path: &Path) -> Result<(Self, JoinHandle<()>)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<PacketRecord>(QUEUE_DEPTH);
        let log_path = path.display().to_string();

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("Unserializable packet record: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!("Packet log {} write failed, disabling: {}", log_path, e);
                    break;
                }
            }
            let _ = file.flush().await;
        });

        Ok((Self { tx }, handle))
    }

    /// Queue a frame for the log
    pub fn record(&self, direction: Direction, connection: &ConnectionId, frame: &str) {
        let record = PacketRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            direction,
            connection: connection.clone(),
            frame: frame.to_string(),
        };
        if self.tx.try_send(record).is_err() {
            debug!(connection = %connection, "Packet log queue full, frame dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_json_lines() {
        let path = std::env::temp_dir()
            .join(format!("mc-bridge-packets-{}", std::process::id()))
            .join("packets.jsonl");
        let _ = tokio::fs::remove_file(&path).await;

        let (logger, handle) = PacketLogger::open(&path).await.unwrap();
        let conn = ConnectionId::from("conn-1");
        logger.record(Direction::Inbound, &conn, r#"{"header":{}}"#);
        logger.record(Direction::Outbound, &conn, "hello");
        drop(logger);
        handle.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["direction"], "inbound");
        assert_eq!(lines[0]["connection"], "conn-1");
        assert_eq!(lines[0]["frame"], r#"{"header":{}}"#);
        assert_eq!(lines[1]["direction"], "outbound");
        assert!(lines[1]["ts"].is_string());
    }
}
