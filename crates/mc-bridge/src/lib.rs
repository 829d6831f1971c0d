//! # mc-bridge
//!
//! WebSocket bridge between Minecraft clients and the tool layer.
//!
//! This crate provides:
//! - `ConnectionRegistry` for live client sessions
//! - `CorrelationTable` matching command responses to waiting callers
//! - The per-connection session loop (frame classification, cleanup)
//! - `CommandDispatcher`, the only outbound command path
//! - `EventDispatcher` handing game events to an external handler
//! - `HealthMonitor` closing idle connections
//! - `PacketLogger`, an optional raw-frame side channel
//! - `BridgeServer`, the WebSocket listener tying it together

pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod events;
pub mod health;
pub mod packet_log;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod ws;

pub use config::BridgeConfig;
pub use correlation::{Completion, CorrelationTable, Waiter};
pub use dispatcher::{CommandDispatcher, CommandOutcome, CommandReply, DispatchConfig, SendOptions};
pub use events::{EventDispatcher, EventHandler};
pub use health::{BackgroundTask, HealthMonitor};
pub use packet_log::{Direction, PacketLogger};
pub use registry::{Connection, ConnectionInfo, ConnectionRegistry};
pub use server::{BridgeServer, ServerHandle};
pub use session::SessionState;
pub use transport::{FrameReader, FrameWriter};
