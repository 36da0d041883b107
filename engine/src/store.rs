//! Store - the in-memory state container.
//!
//! The Store holds documents per collection, the FIFO queue of pending remote
//! operations, tombstones for local deletes and per-user sync settings. Every
//! method is a single atomic step from the caller's point of view; the
//! runtime layer wraps the store in a lock and persists it through
//! [`StoreSnapshot`]s.

use crate::{
    error::Result, reconcile, CollectionName, Document, DocumentId, Error, OperationKind,
    PendingOperation, QueueStatus, RemoteDocument, Resolution, Seq, StoreSnapshot, SyncStatus,
    Timestamp, Tombstone, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A collection of documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Collection {
    documents: HashMap<DocumentId, Document>,
}

impl Collection {
    /// Get a document by ID.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Insert or replace a document.
    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Remove a document, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.documents.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    /// Iterate over all documents.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }
}

/// Sync bookkeeping for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub user_id: UserId,
    /// End of the last drain that ran for this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<Timestamp>,
}

impl UserSettings {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            last_sync_at: None,
        }
    }
}

/// The main store holding all local state.
#[derive(Debug, Clone, Default)]
pub struct Store {
    collections: HashMap<CollectionName, Collection>,
    queue: BTreeMap<Seq, PendingOperation>,
    next_seq: Seq,
    tombstones: HashMap<(CollectionName, DocumentId), Tombstone>,
    settings: HashMap<UserId, UserSettings>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// All documents in a collection, in no particular order.
    pub fn get_all(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|c| c.documents().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a document by collection and ID.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections.get(collection).and_then(|c| c.get(id))
    }

    /// Insert a new document.
    ///
    /// Zero timestamps are filled with `now`. Re-adding an id clears its
    /// tombstone.
    pub fn add(&mut self, mut document: Document, now: Timestamp) -> Result<Document> {
        let collection = self
            .collections
            .entry(document.collection.clone())
            .or_default();

        if collection.contains(&document.id) {
            return Err(Error::DuplicateKey {
                collection: document.collection,
                id: document.id,
            });
        }

        if document.created_at == 0 {
            document.created_at = now;
        }
        if document.updated_at == 0 {
            document.updated_at = now;
        }

        collection.insert(document.clone());
        self.tombstones
            .remove(&(document.collection.clone(), document.id.clone()));

        Ok(document)
    }

    /// Replace an existing document, refreshing `updated_at`.
    ///
    /// The caller's `sync_status` is kept as given.
    pub fn update(&mut self, mut document: Document, now: Timestamp) -> Result<Document> {
        let collection = self
            .collections
            .get_mut(&document.collection)
            .filter(|c| c.contains(&document.id))
            .ok_or_else(|| Error::not_found(&document.collection, &document.id))?;

        // Keep updated_at moving forward even if the wall clock stepped back.
        let previous = collection.get(&document.id).map_or(0, |d| d.updated_at);
        document.updated_at = now.max(previous.saturating_add(1));
        if document.created_at == 0 {
            document.created_at = collection.get(&document.id).map_or(now, |d| d.created_at);
        }

        collection.insert(document.clone());
        Ok(document)
    }

    /// Edit a stored document in place, then write it back as [`update`](Self::update) does.
    ///
    /// Nothing is written if `edit` fails.
    pub fn modify<F>(&mut self, collection: &str, id: &str, now: Timestamp, edit: F) -> Result<Document>
    where
        F: FnOnce(&mut Document) -> Result<()>,
    {
        let mut document = self
            .get(collection, id)
            .cloned()
            .ok_or_else(|| Error::not_found(collection, id))?;
        edit(&mut document)?;
        document.collection = collection.to_string();
        document.id = id.to_string();
        self.update(document, now)
    }

    /// Insert or replace a document exactly as given.
    pub fn put(&mut self, document: Document) {
        self.collections
            .entry(document.collection.clone())
            .or_default()
            .insert(document);
    }

    /// Remove a document and record a tombstone. Idempotent.
    ///
    /// Returns whether a document was removed.
    pub fn delete(&mut self, collection: &str, id: &str, now: Timestamp) -> bool {
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();

        self.tombstones
            .entry((collection.to_string(), id.to_string()))
            .and_modify(|t| t.deleted_at = t.deleted_at.max(now))
            .or_insert_with(|| Tombstone::new(collection, id, now));

        removed
    }

    /// Merge one remote document into the local copy.
    ///
    /// Returns the resulting local document, or `None` when a local delete
    /// suppresses the remote copy.
    pub fn apply_remote(&mut self, collection: &str, remote: &RemoteDocument) -> Option<Document> {
        let key = (collection.to_string(), remote.id.clone());
        let delete_outstanding = self.has_outstanding_kind(collection, &remote.id, OperationKind::Delete);

        let resolution = reconcile::resolve(
            collection,
            self.get(collection, &remote.id),
            self.tombstones.get(&key),
            delete_outstanding,
            remote,
        );

        match resolution {
            Resolution::KeepLocal => self.get(collection, &remote.id).cloned(),
            Resolution::AdoptRemote(document) => {
                self.tombstones.remove(&key);
                self.put(document.clone());
                Some(document)
            }
            Resolution::Suppressed => None,
        }
    }

    /// Mark a document synced with the server timestamp.
    ///
    /// Only applies if the local copy is still the one that was sent, i.e.
    /// its `updated_at` equals `expected_updated_at`.
    pub fn mark_synced(
        &mut self,
        collection: &str,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_at: Timestamp,
    ) -> bool {
        let Some(document) = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.documents.get_mut(id))
        else {
            return false;
        };

        if document.updated_at != expected_updated_at {
            return false;
        }

        document.sync_status = SyncStatus::Synced;
        document.updated_at = confirmed_at;
        true
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Append an operation; assigns its `seq` and resets its queue state.
    pub fn enqueue(&mut self, mut op: PendingOperation) -> PendingOperation {
        op.seq = self.next_seq.max(1);
        self.next_seq = op.seq + 1;
        op.status = QueueStatus::Pending;
        op.attempt_count = 0;
        op.completed_at = None;
        op.next_retry_at = None;

        self.queue.insert(op.seq, op.clone());
        op
    }

    /// Get an operation by seq.
    pub fn operation(&self, seq: Seq) -> Option<&PendingOperation> {
        self.queue.get(&seq)
    }

    /// Operations with the given status, in enqueue order.
    pub fn operations_with_status(&self, status: QueueStatus) -> Vec<PendingOperation> {
        self.queue
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect()
    }

    /// Every retained operation for one document, in enqueue order.
    pub fn operations_for(&self, collection: &str, id: &str) -> Vec<PendingOperation> {
        self.queue
            .values()
            .filter(|op| op.targets(collection, id))
            .cloned()
            .collect()
    }

    /// Whether the document still has a non-completed operation.
    pub fn has_outstanding(&self, collection: &str, id: &str) -> bool {
        self.queue
            .values()
            .any(|op| op.targets(collection, id) && op.status.is_outstanding())
    }

    fn has_outstanding_kind(&self, collection: &str, id: &str, kind: OperationKind) -> bool {
        self.queue.values().any(|op| {
            op.targets(collection, id) && op.kind == kind && op.status.is_outstanding()
        })
    }

    /// Atomically move a pending operation to in-progress.
    pub fn claim_operation(&mut self, seq: Seq) -> Option<PendingOperation> {
        let op = self.queue.get_mut(&seq)?;
        if op.begin() {
            Some(op.clone())
        } else {
            None
        }
    }

    /// Overwrite the stored state of an operation.
    pub fn save_operation(&mut self, op: &PendingOperation) -> Result<()> {
        match self.queue.get_mut(&op.seq) {
            Some(stored) => {
                *stored = op.clone();
                Ok(())
            }
            None => Err(Error::OperationNotFound(op.seq)),
        }
    }

    /// Return operations stranded in-progress by an interrupted drain.
    ///
    /// Operations whose document `in_flight` reports as still being written
    /// are left alone.
    pub fn requeue_in_progress(&mut self, mut in_flight: impl FnMut(&str, &str) -> bool) -> usize {
        let mut count = 0;
        for op in self.queue.values_mut() {
            if op.status == QueueStatus::InProgress && !in_flight(&op.collection, &op.document_id) {
                op.status = QueueStatus::Pending;
                count += 1;
            }
        }
        count
    }

    /// Put a failed operation back in the queue.
    pub fn requeue_failed(&mut self, seq: Seq) -> Result<bool> {
        let op = self
            .queue
            .get_mut(&seq)
            .ok_or(Error::OperationNotFound(seq))?;
        Ok(op.requeue())
    }

    /// Remove completed operations that finished before `older_than`.
    pub fn purge_completed(&mut self, older_than: Timestamp) -> usize {
        let before = self.queue.len();
        self.queue.retain(|_, op| {
            !(op.status == QueueStatus::Completed
                && op.completed_at.is_some_and(|at| at < older_than))
        });
        before - self.queue.len()
    }

    /// Number of retained operations.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ------------------------------------------------------------------
    // Tombstones and settings
    // ------------------------------------------------------------------

    pub fn tombstone(&self, collection: &str, id: &str) -> Option<&Tombstone> {
        self.tombstones.get(&(collection.to_string(), id.to_string()))
    }

    /// Drop tombstones older than `older_than` whose delete is settled.
    pub fn purge_tombstones(&mut self, older_than: Timestamp) -> usize {
        let settled: Vec<_> = self
            .tombstones
            .iter()
            .filter(|(_, t)| t.deleted_at < older_than)
            .filter(|(_, t)| !self.has_outstanding(&t.collection, &t.id))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &settled {
            self.tombstones.remove(key);
        }
        settled.len()
    }

    pub fn settings(&self, user_id: &str) -> Option<&UserSettings> {
        self.settings.get(user_id)
    }

    pub fn save_settings(&mut self, settings: UserSettings) {
        self.settings.insert(settings.user_id.clone(), settings);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        snapshot.next_seq = self.next_seq;

        for collection in self.collections.values() {
            for document in collection.documents() {
                snapshot.add_document(document.clone());
            }
        }
        snapshot.queue = self.queue.values().cloned().collect();
        snapshot.tombstones = self.tombstones.values().cloned().collect();
        snapshot.tombstones.sort_by(|a, b| {
            (&a.collection, &a.id).cmp(&(&b.collection, &b.id))
        });
        snapshot.settings = self.settings.values().cloned().collect();
        snapshot.settings.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        snapshot
    }

    /// Replace the current state with a snapshot's state.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        let mut store = Store::new();
        for (_, documents) in snapshot.collections {
            for (_, document) in documents {
                store.put(document);
            }
        }

        let max_seq = snapshot.queue.iter().map(|op| op.seq).max().unwrap_or(0);
        store.queue = snapshot.queue.into_iter().map(|op| (op.seq, op)).collect();
        store.next_seq = snapshot.next_seq.max(max_seq + 1);

        for tombstone in snapshot.tombstones {
            store
                .tombstones
                .insert((tombstone.collection.clone(), tombstone.id.clone()), tombstone);
        }
        for settings in snapshot.settings {
            store.save_settings(settings);
        }

        *self = store;
        Ok(())
    }
}
