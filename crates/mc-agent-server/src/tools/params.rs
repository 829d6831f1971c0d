//! Typed access to tool call arguments

use mc_agent_core::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Borrowed view over a tool's JSON arguments
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(pub &'a Value);

impl<'a> Params<'a> {
    fn field(&self, name: &str) -> Option<&'a Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn required_str(&self, name: &str) -> Result<&'a str> {
        match self.field(name) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(BridgeError::InvalidParams(format!("'{name}' must be a string"))),
            None => Err(BridgeError::InvalidParams(format!("missing '{name}'"))),
        }
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&'a str>> {
        match self.field(name) {
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(BridgeError::InvalidParams(format!("'{name}' must be a string"))),
            None => Ok(None),
        }
    }

    /// Booleans also accept the strings "true"/"false"
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.field(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(BridgeError::InvalidParams(format!("'{name}' must be a boolean"))),
        }
    }

    /// Numbers also accept numeric strings
    pub fn required_f64(&self, name: &str) -> Result<f64> {
        self.optional_f64(name)?
            .ok_or_else(|| BridgeError::InvalidParams(format!("missing '{name}'")))
    }

    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.field(name) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| BridgeError::InvalidParams(format!("'{name}' must be a number"))),
            Some(_) => Err(BridgeError::InvalidParams(format!("'{name}' must be a number"))),
        }
    }

    pub fn required_i64(&self, name: &str) -> Result<i64> {
        self.i64_or_none(name)?
            .ok_or_else(|| BridgeError::InvalidParams(format!("missing '{name}'")))
    }

    pub fn i64_or(&self, name: &str, default: i64) -> Result<i64> {
        Ok(self.i64_or_none(name)?.unwrap_or(default))
    }

    fn i64_or_none(&self, name: &str) -> Result<Option<i64>> {
        match self.field(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| BridgeError::InvalidParams(format!("'{name}' must be an integer"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| BridgeError::InvalidParams(format!("'{name}' must be an integer"))),
            Some(_) => Err(BridgeError::InvalidParams(format!("'{name}' must be an integer"))),
        }
    }

    /// Deserialize an optional structured field
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.field(name)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| BridgeError::InvalidParams(format!("'{name}': {e}")))
            })
            .transpose()
    }

    pub fn raw(&self, name: &str) -> Option<&'a Value> {
        self.field(name)
    }
}
