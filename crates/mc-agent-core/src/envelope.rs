//! Envelope frames exchanged with the Minecraft client
//!
//! Every frame is a JSON object with a `header` and a `body`:
//! `{"header": {"eventName"?, "requestId"?, "messagePurpose", "version"}, "body": {...}}`
//!
//! Bodies are opaque to the bridge; only the header drives routing.

use crate::error::Result;
use crate::ids::{ConnectionId, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header schema version used for outbound frames
pub const HEADER_VERSION: u64 = 1;

/// Command body version expected by Bedrock's command processor
pub const COMMAND_VERSION: u64 = 17_039_360;

/// Purpose tag carried in `header.messagePurpose`
///
/// Unknown tags are preserved in `Other` instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessagePurpose {
    Event,
    CommandRequest,
    CommandResponse,
    Subscribe,
    Unsubscribe,
    Error,
    Other(String),
}

impl MessagePurpose {
    pub fn as_str(&self) -> &str {
        match self {
            MessagePurpose::Event => "event",
            MessagePurpose::CommandRequest => "commandRequest",
            MessagePurpose::CommandResponse => "commandResponse",
            MessagePurpose::Subscribe => "subscribe",
            MessagePurpose::Unsubscribe => "unsubscribe",
            MessagePurpose::Error => "error",
            MessagePurpose::Other(tag) => tag,
        }
    }
}

impl From<String> for MessagePurpose {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "event" => MessagePurpose::Event,
            "commandRequest" => MessagePurpose::CommandRequest,
            "commandResponse" => MessagePurpose::CommandResponse,
            "subscribe" => MessagePurpose::Subscribe,
            "unsubscribe" => MessagePurpose::Unsubscribe,
            "error" => MessagePurpose::Error,
            _ => MessagePurpose::Other(tag),
        }
    }
}

impl From<MessagePurpose> for String {
    fn from(purpose: MessagePurpose) -> Self {
        purpose.as_str().to_string()
    }
}

fn default_purpose() -> MessagePurpose {
    MessagePurpose::Other(String::new())
}

fn default_version() -> u64 {
    HEADER_VERSION
}

/// Frame header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default = "default_purpose")]
    pub message_purpose: MessagePurpose,
    #[serde(default = "default_version")]
    pub version: u64,
}

/// A header + body frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    /// Build a `commandRequest` frame; `command_line` is passed through verbatim
    pub fn command(request_id: RequestId, command_line: &str) -> Self {
        Self {
            header: Header {
                event_name: None,
                request_id: Some(request_id),
                message_purpose: MessagePurpose::CommandRequest,
                version: HEADER_VERSION,
            },
            body: serde_json::json!({
                "origin": { "type": "player" },
                "commandLine": command_line,
                "version": COMMAND_VERSION,
            }),
        }
    }

    /// Build a `subscribe` frame for one event type
    pub fn subscribe(request_id: RequestId, event_name: &str) -> Self {
        Self {
            header: Header {
                event_name: None,
                request_id: Some(request_id),
                message_purpose: MessagePurpose::Subscribe,
                version: HEADER_VERSION,
            },
            body: serde_json::json!({ "eventName": event_name }),
        }
    }

    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Routing decision for an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Unsolicited game event (`header.eventName` present)
    Event { name: String, body: Value },
    /// Reply to a prior command (`header.requestId` present)
    Response { request_id: RequestId, body: Value },
    /// Neither; logged and dropped
    Unknown(Envelope),
}

impl Inbound {
    /// Classify by header: event name wins over request id, since game events
    /// also carry a (zeroed) request id.
    pub fn classify(envelope: Envelope) -> Self {
        let Envelope { header, body } = envelope;
        if let Some(name) = header.event_name.clone().filter(|n| !n.is_empty()) {
            return Inbound::Event { name, body };
        }
        if let Some(request_id) = header.request_id.clone() {
            return Inbound::Response { request_id, body };
        }
        Inbound::Unknown(Envelope { header, body })
    }
}

/// Identification payload sent to a client right after it connects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub client_id: ConnectionId,
}

impl WelcomeMessage {
    pub fn new(connection_id: &ConnectionId, host: &str, port: u16) -> Self {
        let content = format!(
            "-----------\nConnected to WebSocket server\nHost: {host}\nPort: {port}\nConnection UUID: {connection_id}\n-----------"
        );
        Self {
            kind: "welcome".into(),
            content,
            client_id: connection_id.clone(),
        }
    }
}
