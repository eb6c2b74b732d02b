//! Contract of the shared hierarchical store.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::StorePath;

/// Store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),
    #[error("Store rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Unexpected store reply: {0}")]
    Protocol(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid store path: {0}")]
    Path(#[from] crate::PathError),
    #[error("Subscription closed")]
    Closed,
    #[error("Store error: {0}")]
    Internal(String),
}

/// Change notification for a node under a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Absolute path of the changed node.
    pub path: StorePath,
    /// New value of the node; `Null` when it was removed.
    pub data: Value,
}

impl StoreEvent {
    /// Create a change event.
    #[must_use]
    pub const fn new(path: StorePath, data: Value) -> Self {
        Self { path, data }
    }

    /// Whether the event reports a removal.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.data.is_null()
    }
}

/// Stream of change notifications for one subscription.
pub type ChangeStream = BoxStream<'static, Result<StoreEvent, StoreError>>;

/// Trait for the mediated store backends.
///
/// Values are plain JSON; envelopes are stored as JSON-encoded strings on
/// top of this, see [`crate::envelope`].
#[async_trait]
pub trait MediatedStore: Send + Sync {
    /// Append `value` under a store-generated key and return the key.
    ///
    /// Generated keys sort in creation order.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Read the node at `path`.
    ///
    /// A list node is returned as an object of `key -> value`.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Remove the node at `path`. Removing a missing node succeeds.
    async fn delete(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Subscribe to changes of the subtree rooted at `path`.
    async fn subscribe(&self, path: &StorePath) -> Result<ChangeStream, StoreError>;
}

#[async_trait]
impl<T> MediatedStore for std::sync::Arc<T>
where
    T: MediatedStore + ?Sized,
{
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        (**self).push(path, value).await
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        (**self).get(path).await
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        (**self).delete(path).await
    }

    async fn subscribe(&self, path: &StorePath) -> Result<ChangeStream, StoreError> {
        (**self).subscribe(path).await
    }
}
