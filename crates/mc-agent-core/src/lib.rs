//! # mc-agent-core
//!
//! Shared types for the Minecraft agent bridge.
//!
//! This crate provides the vocabulary used across the bridge, the tool layer and the binary:
//! - Connection and request identifiers
//! - Envelope frames exchanged with the game and their classification
//! - The error taxonomy
//! - Normalized tool results

pub mod envelope;
pub mod error;
pub mod ids;
pub mod tool_result;

pub use envelope::{Envelope, Header, Inbound, MessagePurpose, WelcomeMessage};
pub use error::{BridgeError, Result, error_codes};
pub use ids::{ConnectionId, RequestId};
pub use tool_result::{ToolOutput, ToolResult};
