//! Long-lived subscriptions to the per-modality stream paths.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use device_relay_core::{ChangeStream, MediatedStore, Modality, RelayConfig, StoreEvent, StorePath};
use futures::StreamExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{IngestError, MediaSink, decode_payload};

/// Ingestor settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory receiving decoded chunks.
    pub output_dir: PathBuf,
    /// Delay before re-establishing a failed subscription.
    pub resubscribe_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            resubscribe_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&RelayConfig> for IngestConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            resubscribe_backoff: config.resubscribe_backoff(),
        }
    }
}

/// Counters shared by the modality tasks.
#[derive(Debug, Default)]
pub struct IngestStats {
    saved: AtomicU64,
    discarded: AtomicU64,
}

impl IngestStats {
    #[must_use]
    pub fn snapshot(&self) -> IngestCounts {
        IngestCounts {
            saved: self.saved.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    /// Chunks written to disk.
    pub saved: u64,
    /// Chunks dropped as malformed or unwritable.
    pub discarded: u64,
}

/// Running ingestion tasks.
pub struct IngestHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    stats: Arc<IngestStats>,
}

impl IngestHandle {
    #[must_use]
    pub fn stats(&self) -> IngestCounts {
        self.stats.snapshot()
    }

    /// Token that stops every task when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(self) -> IngestCounts {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for all tasks to finish without cancelling them.
    pub async fn join(mut self) -> IngestCounts {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Ingest task failed");
            }
        }
        self.stats.snapshot()
    }
}

/// Decodes stream chunks pushed by an agent and saves them as files.
#[derive(Debug, Clone)]
pub struct StreamIngestor<S> {
    store: S,
    sink: MediaSink,
    backoff: Duration,
}

impl<S> StreamIngestor<S>
where
    S: MediatedStore + Clone + 'static,
{
    #[must_use]
    pub fn new(store: S, config: IngestConfig) -> Self {
        Self {
            store,
            sink: MediaSink::new(config.output_dir),
            backoff: config.resubscribe_backoff,
        }
    }

    #[must_use]
    pub const fn sink(&self) -> &MediaSink {
        &self.sink
    }

    /// Decode one notification and write it to disk.
    ///
    /// # Errors
    /// Returns error if the payload is malformed, the path names no modality,
    /// or the file cannot be written.
    pub async fn ingest(&self, event: &StoreEvent) -> Result<(Modality, PathBuf), IngestError> {
        let bytes = decode_payload(&event.data)?;
        let modality = Modality::from_store_path(&event.path)
            .ok_or_else(|| IngestError::UnknownModality(event.path.to_string()))?;
        let file = self.sink.write(modality, &bytes).await?;
        Ok((modality, file))
    }

    /// Subscribe to every modality of `user_id` and ingest in the background.
    ///
    /// All subscriptions are established before this returns. Later failures
    /// are retried after the configured backoff until `cancel` fires.
    ///
    /// # Errors
    /// Returns error if the user id is not a valid path segment or an initial
    /// subscription fails.
    pub async fn spawn(
        &self,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<IngestHandle, IngestError> {
        let mut initial = Vec::with_capacity(Modality::ALL.len());
        for modality in Modality::ALL {
            let path = StorePath::stream(modality, user_id)?;
            let events = self.store.subscribe(&path).await?;
            info!(%path, %modality, "Subscribed to stream");
            initial.push((modality, path, events));
        }

        let stats = Arc::new(IngestStats::default());
        let mut tasks = JoinSet::new();
        for (modality, path, events) in initial {
            let ingestor = self.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            tasks.spawn(async move {
                ingestor.run(modality, path, events, cancel, stats).await;
            });
        }

        Ok(IngestHandle {
            cancel,
            tasks,
            stats,
        })
    }

    /// Ingest streams of `user_id` until `cancel` fires.
    ///
    /// # Errors
    /// Returns error if the initial subscriptions fail.
    pub async fn subscribe_streams(
        &self,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<IngestCounts, IngestError> {
        let handle = self.spawn(user_id, cancel.clone()).await?;
        cancel.cancelled().await;
        Ok(handle.shutdown().await)
    }

    async fn run(
        &self,
        modality: Modality,
        root: StorePath,
        initial: ChangeStream,
        cancel: CancellationToken,
        stats: Arc<IngestStats>,
    ) {
        let mut pending = Some(initial);
        loop {
            let mut events = if let Some(events) = pending.take() {
                events
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.backoff) => {}
                }
                match self.store.subscribe(&root).await {
                    Ok(events) => {
                        info!(path = %root, %modality, "Resubscribed to stream");
                        events
                    }
                    Err(e) => {
                        warn!(path = %root, %modality, error = %e, "Resubscribe failed");
                        continue;
                    }
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(%modality, "Stream ingest cancelled");
                        return;
                    }
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(event)) => self.handle(&root, &event, &stats).await,
                    Some(Err(e)) => {
                        warn!(path = %root, %modality, error = %e, "Subscription failed");
                        break;
                    }
                    None => {
                        warn!(path = %root, %modality, "Subscription ended");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, root: &StorePath, event: &StoreEvent, stats: &IngestStats) {
        // Removals and snapshots of the whole collection carry no chunk.
        if event.is_removal() || event.path == *root {
            return;
        }
        match self.ingest(event).await {
            Ok((modality, file)) => {
                stats.saved.fetch_add(1, Ordering::Relaxed);
                info!(%modality, file = %file.display(), "Saved chunk");
            }
            Err(e) => {
                stats.discarded.fetch_add(1, Ordering::Relaxed);
                warn!(path = %event.path, error = %e, "Discarded chunk");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use device_relay_store::MemoryStore;
    use serde_json::json;
    use tokio_test::assert_err;

    use super::*;

    fn ingestor(dir: &std::path::Path) -> StreamIngestor<Arc<MemoryStore>> {
        StreamIngestor::new(
            Arc::new(MemoryStore::new()),
            IngestConfig {
                output_dir: dir.to_path_buf(),
                ..IngestConfig::default()
            },
        )
    }

    fn event(path: &str, data: serde_json::Value) -> StoreEvent {
        StoreEvent::new(StorePath::parse(path).unwrap(), data)
    }

    #[tokio::test]
    async fn test_camera_chunk_is_saved_as_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let (modality, file) = ingestor
            .ingest(&event("camera_stream/u1/-N1", json!("/9j/4A")))
            .await
            .unwrap();

        assert_eq!(modality, Modality::Camera);
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("camera_") && name.ends_with(".jpg"), "{name}");
        assert_eq!(std::fs::read(&file).unwrap(), b"\xff\xd8\xff\xe0");
    }

    #[tokio::test]
    async fn test_audio_chunk_is_saved_as_mp3() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let (modality, file) = ingestor
            .ingest(&event("audio_stream/u1/-N1", json!("SUQz")))
            .await
            .unwrap();

        assert_eq!(modality, Modality::Audio);
        assert_eq!(file.extension().unwrap(), "mp3");
        assert_eq!(std::fs::read(&file).unwrap(), b"ID3");
    }

    #[tokio::test]
    async fn test_user_id_containing_other_token_routes_by_stream() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let (modality, file) = ingestor
            .ingest(&event("camera_stream/audio_stream_fan/-N1", json!("/9j/4A")))
            .await
            .unwrap();

        assert_eq!(modality, Modality::Camera);
        assert_eq!(file.extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn test_malformed_chunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let res = ingestor
            .ingest(&event("screen_stream/u1/-N1", json!("not-base64!!")))
            .await;
        assert!(matches!(res, Err(IngestError::Decode(_))));
        assert_err!(
            ingestor
                .ingest(&event("screen_stream/u1/-N2", json!({"nested": true})))
                .await
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let res = ingestor.ingest(&event("other/u1/-N1", json!("YQ"))).await;
        assert!(matches!(res, Err(IngestError::UnknownModality(p)) if p == "other/u1/-N1"));
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_user() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let res = ingestor.spawn("a/b", CancellationToken::new()).await;
        assert!(matches!(res, Err(IngestError::Path(_))));
    }
}
