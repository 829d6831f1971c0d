//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the WebSocket bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address to listen on (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 8080)
    pub port: u16,
    /// Idle time after which the health monitor closes a connection
    pub connection_timeout_secs: u64,
    /// Health monitor sweep interval
    pub health_check_interval_secs: u64,
    /// Default wait for a command reply
    pub command_timeout_secs: u64,
    /// Resend attempts after a failed write (awaited commands only)
    pub max_retries: u32,
    /// Delay between resend attempts and reconnection polls
    pub retry_delay_ms: u64,
    /// How long a resend waits for the connection to reappear
    pub reconnect_wait_secs: u64,
    /// Outbound frames queued per connection before senders wait
    pub write_queue: usize,
    /// Events subscribed on every new connection
    pub subscriptions: Vec<String>,
    /// Raw frame log (JSON lines); disabled when unset
    pub packet_log: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            connection_timeout_secs: 300,
            health_check_interval_secs: 60,
            command_timeout_secs: 10,
            max_retries: 5,
            retry_delay_ms: 500,
            reconnect_wait_secs: 5,
            write_queue: 32,
            subscriptions: vec!["PlayerMessage".into()],
            packet_log: None,
        }
    }
}

impl BridgeConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }
}
