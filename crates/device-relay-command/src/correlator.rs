//! Response correlation.
//!
//! A wait starts WAITING and ends either MATCHED (the response is returned
//! and its store entry deleted) or TIMED_OUT (nothing is deleted). Store
//! failures and malformed entries inside the loop never end the wait early.

use std::time::Duration;

use device_relay_core::{
    CorrelationKey, MediatedStore, RelayConfig, ResponseEnvelope, StoreError, StoreEvent,
    StorePath, WaitMode,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::CommandError;

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Which response answers a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// The response stored at `command_responses/{user_id}/{key}`.
    Key(CorrelationKey),
    /// The first response in the list whose `command` equals the action.
    ///
    /// Ambiguous when several in-flight commands share an action: whichever
    /// matching entry the store lists first is consumed.
    Action(String),
}

impl Correlation {
    /// Correlate by generated key.
    #[must_use]
    pub const fn key(key: CorrelationKey) -> Self {
        Self::Key(key)
    }

    /// Correlate by action name.
    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self::Action(action.into())
    }
}

/// Final state of a wait.
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    /// A response was found and consumed.
    Matched(ResponseEnvelope),
    /// No response within the timeout.
    TimedOut,
}

impl AwaitOutcome {
    /// The response, if one matched.
    #[must_use]
    pub fn into_response(self) -> Option<ResponseEnvelope> {
        match self {
            Self::Matched(response) => Some(response),
            Self::TimedOut => None,
        }
    }

    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Correlator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// Delay between polls; also used after a watch falls back to polling.
    pub poll_interval: Duration,
    /// Poll or watch.
    pub wait: WaitMode,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            wait: WaitMode::Poll,
        }
    }
}

impl From<&RelayConfig> for CorrelatorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wait: config.wait_strategy,
        }
    }
}

/// Where a wait looks for its response.
enum Target<'a> {
    Node(StorePath),
    List { path: StorePath, action: &'a str },
}

impl Target<'_> {
    const fn path(&self) -> &StorePath {
        match self {
            Self::Node(path) | Self::List { path, .. } => path,
        }
    }
}

enum Wake {
    Deadline,
    Tick,
    Notified(Option<Result<StoreEvent, StoreError>>),
}

/// Waits for responses under `command_responses/{user_id}`.
pub struct Correlator<S> {
    store: S,
    config: CorrelatorConfig,
}

impl<S: MediatedStore> Correlator<S> {
    /// Create a correlator reading from `store`.
    #[must_use]
    pub const fn new(store: S, config: CorrelatorConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub const fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Wait up to `timeout` for the response selected by `correlation`.
    ///
    /// On a match the response entry is deleted before returning; at most
    /// one entry is deleted per call.
    ///
    /// # Errors
    /// Returns error only if `user_id` or the correlation key cannot form a
    /// store path.
    pub async fn await_response(
        &self,
        user_id: &str,
        correlation: &Correlation,
        timeout: Duration,
    ) -> Result<AwaitOutcome, CommandError> {
        let list = StorePath::responses(user_id)?;
        let target = match correlation {
            Correlation::Key(key) => Target::Node(list.child(key.as_str())?),
            Correlation::Action(action) => Target::List {
                path: list,
                action: action.as_str(),
            },
        };
        let deadline = deadline_after(timeout);

        tracing::debug!(user_id, ?correlation, ?timeout, "Waiting for response");
        let outcome = match self.config.wait {
            WaitMode::Poll => self.poll_until(&target, deadline).await,
            WaitMode::Watch => self.watch_until(&target, deadline).await,
        };

        match &outcome {
            AwaitOutcome::Matched(response) => {
                tracing::info!(user_id, command = ?response.command, "Response received");
            }
            AwaitOutcome::TimedOut => {
                tracing::info!(user_id, ?correlation, "No response received");
            }
        }
        Ok(outcome)
    }

    async fn poll_until(&self, target: &Target<'_>, deadline: Instant) -> AwaitOutcome {
        loop {
            if let Some(response) = self.try_match(target).await {
                return AwaitOutcome::Matched(response);
            }
            let now = Instant::now();
            if now >= deadline {
                return AwaitOutcome::TimedOut;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn watch_until(&self, target: &Target<'_>, deadline: Instant) -> AwaitOutcome {
        let mut events = match self.store.subscribe(target.path()).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Subscribe failed, polling instead");
                return self.poll_until(target, deadline).await;
            }
        };

        // Entries written before the subscription started.
        if let Some(response) = self.try_match(target).await {
            return AwaitOutcome::Matched(response);
        }

        loop {
            // The tick rescans after failed reads that no notification will follow.
            let wake = tokio::select! {
                () = tokio::time::sleep_until(deadline) => Wake::Deadline,
                next = events.next() => Wake::Notified(next),
                () = tokio::time::sleep(self.config.poll_interval) => Wake::Tick,
            };
            match wake {
                Wake::Deadline => return AwaitOutcome::TimedOut,
                Wake::Tick => {
                    if let Some(response) = self.try_match(target).await {
                        return AwaitOutcome::Matched(response);
                    }
                }
                Wake::Notified(Some(Ok(event))) => {
                    if event.is_removal() {
                        continue;
                    }
                    if let Some(response) = self.try_match(target).await {
                        return AwaitOutcome::Matched(response);
                    }
                }
                Wake::Notified(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Subscription failed, polling instead");
                    return self.poll_until(target, deadline).await;
                }
                Wake::Notified(None) => {
                    tracing::warn!("Subscription ended, polling instead");
                    return self.poll_until(target, deadline).await;
                }
            }
        }
    }

    /// One scan of the target. Consumes and returns the first match.
    async fn try_match(&self, target: &Target<'_>) -> Option<ResponseEnvelope> {
        let value = match self.store.get(target.path()).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(path = %target.path(), error = %e, "Failed to read responses");
                return None;
            }
        };

        let (node, response) = match target {
            Target::Node(path) => {
                let Some(response) = ResponseEnvelope::from_store_value(&value) else {
                    tracing::warn!(%path, "Skipping malformed response");
                    return None;
                };
                (path.clone(), response)
            }
            Target::List { path, action } => find_action(path, &value, action)?,
        };

        if let Err(e) = self.store.delete(&node).await {
            tracing::warn!(path = %node, error = %e, "Failed to delete consumed response");
        }
        Some(response)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// First entry of `list` answering `action`, in store order.
fn find_action(
    list: &StorePath,
    value: &Value,
    action: &str,
) -> Option<(StorePath, ResponseEnvelope)> {
    let entries = value.as_object()?;
    for (key, raw) in entries {
        let Some(response) = ResponseEnvelope::from_store_value(raw) else {
            tracing::debug!(%list, key = %key, "Skipping malformed response");
            continue;
        };
        if !response.answers(action) {
            continue;
        }
        match list.child(key) {
            Ok(node) => return Some((node, response)),
            Err(e) => tracing::warn!(%list, key = %key, error = %e, "Skipping response with invalid key"),
        }
    }
    None
}
