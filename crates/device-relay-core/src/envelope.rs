//! Records exchanged with the remote agent through the store.
//!
//! Both envelopes are stored as JSON-encoded strings rather than as native
//! store objects, so `to_store_value` / `from_store_value` do the extra
//! encoding layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store-generated key of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wrap a generated key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Command written by the operator for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Action name, opaque to the relay.
    pub action: String,
    /// Action parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Creation time (Unix epoch milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl CommandEnvelope {
    /// Create an envelope without a timestamp.
    #[must_use]
    pub fn new(action: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
            timestamp: None,
        }
    }

    /// Set the creation timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Encode as the JSON string value written to the store.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_store_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_string(self).map(Value::String)
    }
}

/// Result written by the agent.
///
/// Only `command` is interpreted; every other field is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Echo of the action this response answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Remaining result fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResponseEnvelope {
    /// Decode a stored response.
    ///
    /// Accepts the usual JSON-encoded string as well as a raw JSON object.
    /// Returns `None` for anything else, including strings that are not a
    /// JSON object.
    #[must_use]
    pub fn from_store_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => serde_json::from_str(raw).ok(),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    /// Encode as the JSON string value written to the store.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_store_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_string(self).map(Value::String)
    }

    /// Whether this response echoes `action`.
    #[must_use]
    pub fn answers(&self, action: &str) -> bool {
        self.command.as_deref() == Some(action)
    }

    /// Agent-reported status (`"success"` / `"error"`), if present.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Agent-reported payload, if present.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.fields.get("data")
    }

    /// Agent-reported timestamp (Unix epoch milliseconds), if present.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get("timestamp").and_then(Value::as_i64)
    }

    /// Whether the agent reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status() == Some("error")
    }

    /// Flatten back into a single JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        if let Some(command) = self.command {
            map.insert("command".to_string(), Value::String(command));
        }
        map.extend(self.fields);
        Value::Object(map)
    }
}
