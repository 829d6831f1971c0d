//! Normalized tool results
//!
//! Tools may answer with a structured [`ToolResult`] or a plain JSON mapping.
//! Callers only ever see the normalized form:
//! `{success, message?, data?, error?, request_id?, response?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform success/error structure returned by every tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Normalize an arbitrary JSON answer.
    ///
    /// An object with a boolean `success` field is read as a structured result;
    /// anything else is a successful result carrying the value as `data`.
    pub fn normalize(value: Value) -> Self {
        let structured = value
            .as_object()
            .is_some_and(|obj| obj.get("success").is_some_and(Value::is_boolean));

        if structured {
            if let Ok(result) = serde_json::from_value::<ToolResult>(value.clone()) {
                return result;
            }
        }

        ToolResult {
            success: true,
            data: Some(value),
            ..Default::default()
        }
    }
}

/// What a tool hands back before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Structured(ToolResult),
    Plain(Value),
}

impl ToolOutput {
    pub fn into_result(self) -> ToolResult {
        match self {
            ToolOutput::Structured(result) => result,
            ToolOutput::Plain(value) => ToolResult::normalize(value),
        }
    }
}

impl From<ToolResult> for ToolOutput {
    fn from(result: ToolResult) -> Self {
        ToolOutput::Structured(result)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Plain(value)
    }
}
