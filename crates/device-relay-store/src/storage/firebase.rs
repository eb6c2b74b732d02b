//! Firebase Realtime Database store (feature-gated).
//!
//! Talks to the REST API: `POST` appends under a generated key, `GET`/`DELETE`
//! are point operations and a `GET` with `Accept: text/event-stream` streams
//! `put`/`patch` notifications for a subtree.

use async_trait::async_trait;
use device_relay_core::{
    ChangeStream, MediatedStore, RelayConfig, StoreError, StoreEvent, StorePath,
};
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, StatusCode};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffered notifications per subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Reply to a `POST`.
#[derive(Debug, Deserialize)]
struct PushReply {
    name: String,
}

/// Body of a `put` / `patch` server-sent event.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// Firebase Realtime Database store.
#[derive(Clone)]
pub struct FirebaseStore {
    client: reqwest::Client,
    database_url: String,
    auth_token: Option<String>,
}

impl FirebaseStore {
    /// Create a store without touching the network.
    #[must_use]
    pub fn new(database_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let database_url = database_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            database_url,
            auth_token,
        }
    }

    /// Create a store from configuration and probe the database root.
    ///
    /// # Errors
    /// Returns error if `database_url` is missing, the database is unreachable
    /// or the credentials are rejected.
    pub async fn connect(config: &RelayConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| StoreError::Internal("database_url is not configured".into()))?;
        let store = Self::new(url, config.auth_token.clone());

        tracing::info!(url = %store.database_url, "Connecting to Firebase Realtime Database");
        let response = store
            .request(Method::GET, &StorePath::root())
            .query(&[("shallow", "true")])
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        tracing::info!("Firebase store ready");

        Ok(store)
    }

    /// Write `value` at `path`, replacing what was there.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn set(&self, path: &StorePath, value: &Value) -> Result<(), StoreError> {
        let response = self
            .request(Method::PUT, path)
            .json(value)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    fn url(&self, path: &StorePath) -> String {
        format!("{}/{path}.json", self.database_url)
    }

    fn request(&self, method: Method, path: &StorePath) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    StoreError::Unreachable(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unauthorized(format!("{status}: {body}"))
        }
        _ => StoreError::Protocol(format!("{status}: {body}")),
    }
}

/// Translate one server-sent event into store events.
///
/// `put` replaces the node at `root/path`; `patch` updates each listed child
/// of `root/path`. `keep-alive` yields nothing; `cancel` and `auth_revoked`
/// end the subscription.
///
/// # Errors
/// Returns error for revoked subscriptions and malformed payloads.
pub fn translate_event(
    root: &StorePath,
    event: &str,
    data: &str,
) -> Result<Vec<StoreEvent>, StoreError> {
    match event {
        "put" => {
            let payload: StreamPayload = serde_json::from_str(data)?;
            Ok(vec![StoreEvent::new(root.join(&payload.path)?, payload.data)])
        }
        "patch" => {
            let payload: StreamPayload = serde_json::from_str(data)?;
            let base = root.join(&payload.path)?;
            let Value::Object(children) = payload.data else {
                return Err(StoreError::Protocol(format!(
                    "patch data is not an object at {base}"
                )));
            };
            children
                .into_iter()
                .map(|(child, value)| Ok(StoreEvent::new(base.join(&child)?, value)))
                .collect()
        }
        "keep-alive" => Ok(Vec::new()),
        "cancel" | "auth_revoked" => Err(StoreError::Unauthorized(format!(
            "subscription {event} at {root}"
        ))),
        other => Err(StoreError::Protocol(format!("unknown event type {other:?}"))),
    }
}

fn eventsource_error(e: reqwest_eventsource::Error) -> StoreError {
    match e {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => status_error(status, ""),
        reqwest_eventsource::Error::StreamEnded => StoreError::Closed,
        other => StoreError::Unreachable(other.to_string()),
    }
}

async fn forward_events(
    mut source: EventSource,
    root: StorePath,
    tx: mpsc::Sender<Result<StoreEvent, StoreError>>,
) {
    while let Some(next) = source.next().await {
        let batch = match next {
            Ok(Event::Open) => {
                tracing::debug!(%root, "Subscription opened");
                continue;
            }
            Ok(Event::Message(msg)) => translate_event(&root, &msg.event, &msg.data),
            Err(e) => Err(eventsource_error(e)),
        };
        match batch {
            Ok(events) => {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        source.close();
                        return;
                    }
                }
            }
            Err(
                e @ (StoreError::Protocol(_) | StoreError::Serialization(_) | StoreError::Path(_)),
            ) => {
                tracing::warn!(%root, error = %e, "Skipping malformed notification");
            }
            Err(e) => {
                tracing::warn!(%root, error = %e, "Subscription ended");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    source.close();
}

#[async_trait]
impl MediatedStore for FirebaseStore {
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let response = self
            .request(Method::POST, path)
            .json(&value)
            .send()
            .await
            .map_err(transport_error)?;
        let reply: PushReply = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol(e.to_string()))?;
        Ok(reply.name)
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(transport_error)?;
        let value: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol(e.to_string()))?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn subscribe(&self, path: &StorePath) -> Result<ChangeStream, StoreError> {
        let builder = self
            .request(Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let source =
            EventSource::new(builder).map_err(|e| StoreError::Internal(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(forward_events(source, path.clone(), tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}
