//! Transport implementations for MCP

pub mod stdio;
