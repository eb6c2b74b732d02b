//! Dispatch-and-await client bound to one device.

use std::time::Duration;

use device_relay_core::{CorrelationKey, CorrelationMode, MediatedStore, RelayConfig};
use serde_json::{Map, Value};

use crate::{
    AwaitOutcome, CommandError, Correlation, Correlator, CorrelatorConfig, Dispatcher,
};

/// Result of [`CommandClient::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    /// Key of the dispatched command.
    pub key: CorrelationKey,
    /// What the wait produced.
    pub outcome: AwaitOutcome,
}

/// Sends commands to one device and waits for their responses.
pub struct CommandClient<S> {
    user_id: String,
    dispatcher: Dispatcher<S>,
    correlator: Correlator<S>,
    timeout: Duration,
    mode: CorrelationMode,
}

impl<S> CommandClient<S>
where
    S: MediatedStore + Clone,
{
    /// Create a client from configuration.
    #[must_use]
    pub fn new(store: S, config: &RelayConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            dispatcher: Dispatcher::new(store.clone()),
            correlator: Correlator::new(store, CorrelatorConfig::from(config)),
            timeout: config.response_timeout(),
            mode: config.correlation,
        }
    }

    /// Override the default response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the default correlation mode.
    #[must_use]
    pub fn with_correlation(mut self, mode: CorrelationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dispatch without waiting.
    ///
    /// # Errors
    /// Returns error if the dispatch fails.
    pub async fn dispatch(
        &self,
        action: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<CorrelationKey, CommandError> {
        self.dispatcher.dispatch(&self.user_id, action, params).await
    }

    /// Dispatch, then wait with the default timeout and correlation mode.
    ///
    /// # Errors
    /// Returns error if the dispatch fails.
    pub async fn send(
        &self,
        action: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<SendReport, CommandError> {
        self.send_with(action, params, self.mode, self.timeout).await
    }

    /// Dispatch, then wait with explicit correlation mode and timeout.
    ///
    /// # Errors
    /// Returns error if the dispatch fails.
    pub async fn send_with(
        &self,
        action: &str,
        params: Option<Map<String, Value>>,
        mode: CorrelationMode,
        timeout: Duration,
    ) -> Result<SendReport, CommandError> {
        let key = self.dispatch(action, params).await?;
        let correlation = match mode {
            CorrelationMode::Key => Correlation::Key(key.clone()),
            CorrelationMode::Action => Correlation::action(action),
        };
        let outcome = self
            .correlator
            .await_response(&self.user_id, &correlation, timeout)
            .await?;
        Ok(SendReport { key, outcome })
    }
}
