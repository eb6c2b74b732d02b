//! Command dispatch.

use std::time::{SystemTime, UNIX_EPOCH};

use device_relay_core::{CommandEnvelope, CorrelationKey, MediatedStore, StorePath};
use serde_json::{Map, Value};

use crate::CommandError;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Parse operator-supplied parameters.
///
/// Blank input means no parameters.
///
/// # Errors
/// Returns error if `raw` is not a JSON object.
pub fn parse_params(raw: &str) -> Result<Map<String, Value>, CommandError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(CommandError::InvalidInput(format!(
            "parameters must be a JSON object, got {other}"
        ))),
    }
}

/// Appends command envelopes under `commands/{user_id}`.
pub struct Dispatcher<S> {
    store: S,
}

impl<S: MediatedStore> Dispatcher<S> {
    /// Create a dispatcher writing to `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Write a command for `user_id` and return its correlation key.
    ///
    /// # Errors
    /// Returns error if `user_id` or `action` is empty, or the store write
    /// fails.
    pub async fn dispatch(
        &self,
        user_id: &str,
        action: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<CorrelationKey, CommandError> {
        if user_id.trim().is_empty() {
            return Err(CommandError::InvalidInput("user_id must not be empty".into()));
        }
        if action.trim().is_empty() {
            return Err(CommandError::InvalidInput("action must not be empty".into()));
        }

        let envelope =
            CommandEnvelope::new(action, params.unwrap_or_default()).with_timestamp(now_millis());
        let list = StorePath::commands(user_id)?;
        let key = self.store.push(&list, envelope.to_store_value()?).await?;

        tracing::info!(user_id, action, key = %key, "Command dispatched");
        Ok(CorrelationKey::new(key))
    }
}
