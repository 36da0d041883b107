//! Durable on-device storage.
//!
//! Every [`LocalStore`] call is atomic: it either takes full effect or none,
//! and concurrent calls never observe each other half-done. The sync engine
//! relies on this to apply a remote result with a single follow-up call
//! instead of holding a lock across network IO.

mod memory;
mod sqlite;

pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use crate::error::Result;
use async_trait::async_trait;
use gardensync_engine::{
    Document, PendingOperation, QueueStatus, RemoteDocument, Seq, Timestamp, UserSettings,
};

/// An edit applied to one stored document inside a single store call.
pub type DocumentEdit<'a> =
    &'a mut (dyn FnMut(&mut Document) -> gardensync_engine::error::Result<()> + Send);

/// Whether a document has a write on its way to the remote store.
pub type InFlightCheck<'a> = &'a (dyn Fn(&str, &str) -> bool + Send + Sync);

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// All documents in a collection.
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Insert a new document; `DuplicateKey` if the id is taken.
    ///
    /// Zero timestamps are filled with the current time.
    async fn add(&self, document: Document) -> Result<Document>;

    /// Replace an existing document; `NotFound` if absent.
    ///
    /// `updatedAt` is refreshed; the caller's `syncStatus` is kept.
    async fn update(&self, document: Document) -> Result<Document>;

    /// Read, edit and write back one document atomically; `NotFound` if absent.
    ///
    /// `updatedAt` is refreshed as by [`update`](Self::update). Nothing is
    /// written if `edit` fails.
    async fn modify(&self, collection: &str, id: &str, edit: DocumentEdit<'_>) -> Result<Document>;

    /// Insert or replace a document exactly as given.
    async fn put(&self, document: Document) -> Result<()>;

    /// Remove a document and record a tombstone. Idempotent.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Merge one remote copy into local state.
    ///
    /// Returns the resulting local document, or `None` if a local delete
    /// suppresses the remote copy.
    async fn apply_remote(
        &self,
        collection: &str,
        remote: &RemoteDocument,
    ) -> Result<Option<Document>>;

    /// Mark a document synced at `confirmed_at`, but only if its
    /// `updatedAt` still equals `expected_updated_at`.
    async fn mark_synced(
        &self,
        collection: &str,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_at: Timestamp,
    ) -> Result<bool>;

    /// Append an operation; the store assigns `seq` and resets its state.
    async fn enqueue(&self, op: PendingOperation) -> Result<PendingOperation>;

    /// Operations with the given status, ordered by `seq`.
    async fn operations_with_status(&self, status: QueueStatus) -> Result<Vec<PendingOperation>>;

    /// All retained operations for one document, ordered by `seq`.
    async fn operations_for(&self, collection: &str, id: &str) -> Result<Vec<PendingOperation>>;

    /// Move a pending operation to in-progress. `None` if it was not pending.
    async fn claim_operation(&self, seq: Seq) -> Result<Option<PendingOperation>>;

    /// Persist an operation's state.
    async fn save_operation(&self, op: &PendingOperation) -> Result<()>;

    /// Whether the document has a non-completed operation.
    async fn has_outstanding(&self, collection: &str, id: &str) -> Result<bool>;

    /// Return stranded in-progress operations to pending. Returns how many moved.
    ///
    /// Operations for documents `in_flight` reports are still live and stay put.
    async fn requeue_in_progress(&self, in_flight: InFlightCheck<'_>) -> Result<usize>;

    /// Put a failed operation back in the queue with a fresh attempt budget.
    ///
    /// Returns false if the operation exists but is not failed.
    async fn requeue_failed(&self, seq: Seq) -> Result<bool>;

    /// Drop completed operations finished before `older_than`.
    async fn purge_completed(&self, older_than: Timestamp) -> Result<usize>;

    /// Drop settled tombstones recorded before `older_than`.
    async fn purge_tombstones(&self, older_than: Timestamp) -> Result<usize>;

    async fn load_settings(&self, user_id: &str) -> Result<Option<UserSettings>>;

    async fn save_settings(&self, settings: &UserSettings) -> Result<()>;
}
