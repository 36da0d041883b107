//! In-memory local store with optional snapshot-file persistence.

use super::{DocumentEdit, InFlightCheck, LocalStore};
use crate::error::Result;
use async_trait::async_trait;
use gardensync_engine::{
    Clock, Document, PendingOperation, QueueStatus, RemoteDocument, Seq, Store, StoreSnapshot,
    SystemClock, Timestamp, UserSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Local store backed by the engine's [`Store`].
///
/// When opened on a file, every write is flushed as a JSON snapshot (written
/// to a temporary file, then renamed) before the call returns. A failed flush
/// rolls the in-memory state back.
#[derive(Debug)]
pub struct MemoryLocalStore {
    store: Mutex<Store>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocalStore {
    /// A volatile store.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(Store::new()),
            path: None,
            clock,
        }
    }

    /// A store persisted to `path`, loading the existing snapshot if any.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Store::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                store.import_state(StoreSnapshot::from_json(&json)?)?;
                tracing::debug!(path = %path.display(), queued = store.queue_len(), "loaded snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no snapshot, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            store: Mutex::new(store),
            path: Some(path),
            clock,
        })
    }

    /// Current state as a snapshot.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.lock().await.export_state()
    }

    async fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let store = self.store.lock().await;
        f(&store)
    }

    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Store, Timestamp) -> gardensync_engine::error::Result<R> + Send,
        R: Send,
    {
        let now = self.clock.now();
        let mut store = self.store.lock().await;

        let Some(path) = &self.path else {
            return Ok(f(&mut store, now)?);
        };

        let backup = store.clone();
        let result = f(&mut store, now)?;
        if let Err(e) = persist(path, &store).await {
            tracing::error!(path = %path.display(), error = %e, "snapshot flush failed");
            *store = backup;
            return Err(e);
        }
        Ok(result)
    }
}

async fn persist(path: &Path, store: &Store) -> Result<()> {
    let bytes = serde_json::to_vec(&store.export_state())?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self.read(|s| s.get_all(collection)).await)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self.read(|s| s.get(collection, id).cloned()).await)
    }

    async fn add(&self, document: Document) -> Result<Document> {
        self.write(|s, now| s.add(document, now)).await
    }

    async fn update(&self, document: Document) -> Result<Document> {
        self.write(|s, now| s.update(document, now)).await
    }

    async fn modify(&self, collection: &str, id: &str, edit: DocumentEdit<'_>) -> Result<Document> {
        self.write(|s, now| s.modify(collection, id, now, |doc| edit(doc)))
            .await
    }

    async fn put(&self, document: Document) -> Result<()> {
        self.write(|s, _| {
            s.put(document);
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.write(|s, now| {
            s.delete(collection, id, now);
            Ok(())
        })
        .await
    }

    async fn apply_remote(
        &self,
        collection: &str,
        remote: &RemoteDocument,
    ) -> Result<Option<Document>> {
        self.write(|s, _| Ok(s.apply_remote(collection, remote))).await
    }

    async fn mark_synced(
        &self,
        collection: &str,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_at: Timestamp,
    ) -> Result<bool> {
        self.write(|s, _| Ok(s.mark_synced(collection, id, expected_updated_at, confirmed_at)))
            .await
    }

    async fn enqueue(&self, op: PendingOperation) -> Result<PendingOperation> {
        self.write(|s, _| Ok(s.enqueue(op))).await
    }

    async fn operations_with_status(&self, status: QueueStatus) -> Result<Vec<PendingOperation>> {
        Ok(self.read(|s| s.operations_with_status(status)).await)
    }

    async fn operations_for(&self, collection: &str, id: &str) -> Result<Vec<PendingOperation>> {
        Ok(self.read(|s| s.operations_for(collection, id)).await)
    }

    async fn claim_operation(&self, seq: Seq) -> Result<Option<PendingOperation>> {
        self.write(|s, _| Ok(s.claim_operation(seq))).await
    }

    async fn save_operation(&self, op: &PendingOperation) -> Result<()> {
        self.write(|s, _| s.save_operation(op)).await
    }

    async fn has_outstanding(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.read(|s| s.has_outstanding(collection, id)).await)
    }

    async fn requeue_in_progress(&self, in_flight: InFlightCheck<'_>) -> Result<usize> {
        self.write(|s, _| Ok(s.requeue_in_progress(in_flight))).await
    }

    async fn requeue_failed(&self, seq: Seq) -> Result<bool> {
        self.write(|s, _| s.requeue_failed(seq)).await
    }

    async fn purge_completed(&self, older_than: Timestamp) -> Result<usize> {
        self.write(|s, _| Ok(s.purge_completed(older_than))).await
    }

    async fn purge_tombstones(&self, older_than: Timestamp) -> Result<usize> {
        self.write(|s, _| Ok(s.purge_tombstones(older_than))).await
    }

    async fn load_settings(&self, user_id: &str) -> Result<Option<UserSettings>> {
        Ok(self.read(|s| s.settings(user_id).cloned()).await)
    }

    async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        let settings = settings.clone();
        self.write(|s, _| {
            s.save_settings(settings);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gardensync_engine::{fields, ManualClock, SyncStatus};
    use serde_json::json;

    fn task(id: &str) -> Document {
        Document::new(id, "tasks", fields(json!({"title": "Water"})))
    }

    #[tokio::test]
    async fn snapshot_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garden.json");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));

        let store = MemoryLocalStore::open(&path, clock.clone()).await.unwrap();
        store.add(task("t1")).await.unwrap();
        let op = store
            .enqueue(PendingOperation::add(task("t1").at(1_000), 1_000))
            .await
            .unwrap();
        store.delete("tasks", "gone").await.unwrap();
        drop(store);

        let reopened = MemoryLocalStore::open(&path, clock).await.unwrap();
        let doc = reopened.get("tasks", "t1").await.unwrap().unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Pending);
        let pending = reopened.operations_with_status(QueueStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, op.seq);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garden.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let result = MemoryLocalStore::open(&path, Arc::new(ManualClock::new(0))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn uses_clock_for_timestamps() {
        let clock = Arc::new(ManualClock::new(42));
        let store = MemoryLocalStore::with_clock(clock.clone());

        let doc = store.add(task("t1")).await.unwrap();
        assert_eq!(doc.created_at, 42);

        clock.advance(8);
        let updated = store.update(doc).await.unwrap();
        assert_eq!(updated.updated_at, 50);
    }
}
