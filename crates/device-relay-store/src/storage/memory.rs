//! In-memory mediated store.

use std::sync::{
    RwLock,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use device_relay_core::{ChangeStream, MediatedStore, StoreError, StoreEvent, StorePath};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

/// Capacity of the change notification channel.
const EVENT_CAPACITY: usize = 10_000;

/// In-memory store implementation.
///
/// Keeps the whole namespace as one JSON tree and fans changes out over a
/// broadcast channel. Subscribers only see changes made after they
/// subscribed. Data is lost on drop.
pub struct MemoryStore {
    tree: RwLock<Value>,
    seq: AtomicU64,
    sender: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tree: RwLock::new(Value::Object(Map::new())),
            seq: AtomicU64::new(0),
            sender,
        }
    }

    /// Write `value` at `path`, replacing what was there.
    ///
    /// This is how an agent answers under a known key.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        if value.is_null() {
            return self.remove(path);
        }
        {
            let mut tree = self
                .tree
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            insert(&mut tree, path.segments(), value.clone());
        }
        self.notify(path.clone(), value);
        Ok(())
    }

    /// Number of children under `path`.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn child_count(&self, path: &StorePath) -> Result<usize, StoreError> {
        let tree = self
            .tree
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(lookup(&tree, path.segments())
            .and_then(Value::as_object)
            .map_or(0, Map::len))
    }

    /// Generate a key that sorts after every key generated before it.
    fn next_key(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!("-M{seq:010}{}", &suffix[..8])
    }

    fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let removed = {
            let mut tree = self
                .tree
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            remove(&mut tree, path.segments())
        };
        if removed {
            self.notify(path.clone(), Value::Null);
        }
        Ok(())
    }

    fn notify(&self, path: StorePath, data: Value) {
        // No receivers is fine.
        let _ = self.sender.send(StoreEvent::new(path, data));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(tree: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

fn insert(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        insert(child, rest, value);
    }
}

/// Remove the node and prune parents left empty. Returns whether it existed.
fn remove(node: &mut Value, segments: &[String]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        let existed = !is_empty(node);
        *node = Value::Object(Map::new());
        return existed;
    };
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(first).is_some();
    }
    let Some(child) = map.get_mut(first) else {
        return false;
    };
    let removed = remove(child, rest);
    if removed && is_empty(child) {
        map.remove(first);
    }
    removed
}

fn is_empty(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl MediatedStore for MemoryStore {
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let key = self.next_key();
        self.set(&path.child(&key)?, value)?;
        Ok(key)
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let tree = self
            .tree
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(lookup(&tree, path.segments())
            .filter(|node| !is_empty(node))
            .cloned())
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        self.remove(path)
    }

    async fn subscribe(&self, path: &StorePath) -> Result<ChangeStream, StoreError> {
        let root = path.clone();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |res| {
            let root = root.clone();
            async move {
                match res {
                    Ok(event) if event.path.starts_with(&root) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(%root, skipped, "Subscriber lagged, notifications dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
