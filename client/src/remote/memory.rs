//! In-process remote store for tests and demos.

use super::{RemoteError, RemoteResult, RemoteStore};
use async_trait::async_trait;
use dashmap::DashMap;
use gardensync_engine::{Clock, Fields, RemoteDocument, SystemClock, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A remote store held in memory, one namespace per account.
///
/// Server timestamps come from the supplied clock and never repeat or go
/// backwards. Failures can be injected with [`fail_next`](Self::fail_next)
/// and [`set_available`](Self::set_available).
#[derive(Debug)]
pub struct MemoryRemoteStore {
    /// Keyed by `(uid, collection, id)`
    documents: DashMap<(String, String, String), RemoteDocument>,
    clock: Arc<dyn Clock>,
    last_timestamp: AtomicU64,
    available: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicUsize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            documents: DashMap::new(),
            clock,
            last_timestamp: AtomicU64::new(0),
            available: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every call fail with `Unavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Write a document as another client would, at an explicit server time.
    pub fn insert(&self, uid: &str, collection: &str, document: RemoteDocument) {
        self.last_timestamp
            .fetch_max(document.updated_at, Ordering::SeqCst);
        self.documents
            .insert(key(uid, collection, &document.id), document);
    }

    /// Inspect a stored document without going through the failure gate.
    pub fn peek(&self, uid: &str, collection: &str, id: &str) -> Option<RemoteDocument> {
        self.documents
            .get(&key(uid, collection, id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self, uid: &str, collection: &str) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.key().0 == uid && entry.key().1 == collection)
            .count()
    }

    fn gate(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote store offline".into()));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn server_time(&self) -> Timestamp {
        let now = self.clock.now();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

fn key(uid: &str, collection: &str, id: &str) -> (String, String, String) {
    (uid.to_string(), collection.to_string(), id.to_string())
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
    ) -> RemoteResult<Option<RemoteDocument>> {
        self.gate()?;
        Ok(self.peek(uid, collection, id))
    }

    async fn set(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<Timestamp> {
        self.gate()?;
        let updated_at = self.server_time();
        let key = key(uid, collection, id);

        let created_at = self
            .documents
            .get(&key)
            .and_then(|existing| existing.created_at)
            .unwrap_or(updated_at);

        self.documents.insert(
            key,
            RemoteDocument {
                id: id.to_string(),
                fields: fields.clone(),
                created_at: Some(created_at),
                updated_at,
            },
        );
        Ok(updated_at)
    }

    async fn update(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<Timestamp> {
        self.gate()?;
        let mut document = self.documents.get_mut(&key(uid, collection, id)).ok_or(RemoteError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;

        let updated_at = self.server_time();
        document.fields = fields.clone();
        document.updated_at = updated_at;
        Ok(updated_at)
    }

    async fn delete(&self, uid: &str, collection: &str, id: &str) -> RemoteResult<()> {
        self.gate()?;
        self.documents
            .remove(&key(uid, collection, id))
            .map(|_| ())
            .ok_or(RemoteError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn get_all(&self, uid: &str, collection: &str) -> RemoteResult<Vec<RemoteDocument>> {
        self.gate()?;
        let mut documents: Vec<RemoteDocument> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == uid && entry.key().1 == collection)
            .map(|entry| entry.value().clone())
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gardensync_engine::{fields, ManualClock};
    use serde_json::json;

    fn store() -> (Arc<ManualClock>, MemoryRemoteStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        (clock.clone(), MemoryRemoteStore::with_clock(clock))
    }

    #[tokio::test]
    async fn set_get_update_delete() {
        let (clock, remote) = store();

        let ts = remote.set("u1", "plots", "p1", &fields(json!({"name": "Bed A"}))).await.unwrap();
        assert_eq!(ts, 1_000);

        clock.advance(500);
        let ts = remote.update("u1", "plots", "p1", &fields(json!({"name": "Bed B"}))).await.unwrap();
        assert_eq!(ts, 1_500);

        let doc = remote.get("u1", "plots", "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("Bed B"));
        assert_eq!(doc.created_at, Some(1_000));

        remote.delete("u1", "plots", "p1").await.unwrap();
        assert!(remote.get("u1", "plots", "p1").await.unwrap().is_none());
        assert!(remote.delete("u1", "plots", "p1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn server_time_is_strictly_increasing() {
        let (_clock, remote) = store();
        let a = remote.set("u1", "plots", "p1", &Fields::new()).await.unwrap();
        let b = remote.set("u1", "plots", "p2", &Fields::new()).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn accounts_do_not_share_documents() {
        let (_clock, remote) = store();
        remote.set("u1", "plots", "p1", &fields(json!({"name": "Bed A"}))).await.unwrap();

        assert!(remote.get("u2", "plots", "p1").await.unwrap().is_none());
        assert!(remote.get_all("u2", "plots").await.unwrap().is_empty());
        assert!(remote.delete("u2", "plots", "p1").await.unwrap_err().is_not_found());
        assert_eq!(remote.len("u1", "plots"), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let (_clock, remote) = store();
        remote.fail_next(2);
        assert!(remote.get_all("u1", "plots").await.is_err());
        assert!(remote.get_all("u1", "plots").await.is_err());
        assert!(remote.get_all("u1", "plots").await.is_ok());

        remote.set_available(false);
        assert!(matches!(
            remote.set("u1", "plots", "p1", &Fields::new()).await,
            Err(RemoteError::Unavailable(_))
        ));
        assert_eq!(remote.call_count(), 4);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (_clock, remote) = store();
        let result = remote.update("u1", "plots", "nope", &Fields::new()).await;
        assert!(matches!(result, Err(RemoteError::NotFound { .. })));
    }
}
