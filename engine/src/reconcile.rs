//! Reconciliation of local and remote document states.
//!
//! # Algorithm
//!
//! Applied per document id when a remote copy is observed:
//!
//! 1. A local copy with `syncStatus == pending` wins outright. Unsynced
//!    edits are never discarded.
//! 2. Otherwise a remote copy with a strictly newer `updatedAt` wins: its
//!    fields are adopted, the local id is kept, and the result is `synced`.
//! 3. Otherwise the local copy wins. Ties favour local to avoid oscillation.
//!
//! This is last-writer-wins at document granularity: concurrent edits to
//! different fields of one document are not merged.
//!
//! Locally deleted documents are covered by [`Tombstone`]s. While the delete
//! is still queued every remote copy is suppressed; once it is confirmed, only
//! remote copies written after the delete may bring the document back.

use crate::{CollectionName, Document, DocumentId, RemoteDocument, SyncStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Record of a local delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub collection: CollectionName,
    pub id: DocumentId,
    pub deleted_at: Timestamp,
}

impl Tombstone {
    pub fn new(
        collection: impl Into<CollectionName>,
        id: impl Into<DocumentId>,
        deleted_at: Timestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            deleted_at,
        }
    }

    /// Whether this delete takes precedence over a remote write made at `updated_at`.
    pub fn shadows(&self, updated_at: Timestamp) -> bool {
        updated_at <= self.deleted_at
    }
}

/// Which side won a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The local copy stands unchanged
    KeepLocal,
    /// The remote copy replaces (or creates) the local document
    AdoptRemote(Document),
    /// The remote copy is hidden by a local delete
    Suppressed,
}

impl Resolution {
    pub fn is_remote(&self) -> bool {
        matches!(self, Resolution::AdoptRemote(_))
    }
}

/// Merge a remote copy into an existing local document.
pub fn merge_documents(local: &Document, remote: &RemoteDocument) -> Resolution {
    if local.sync_status == SyncStatus::Pending {
        return Resolution::KeepLocal;
    }

    if remote.updated_at > local.updated_at {
        return Resolution::AdoptRemote(Document {
            id: local.id.clone(),
            collection: local.collection.clone(),
            fields: remote.fields.clone(),
            created_at: remote.created_at.unwrap_or(local.created_at),
            updated_at: remote.updated_at,
            sync_status: SyncStatus::Synced,
        });
    }

    Resolution::KeepLocal
}

/// Decide what a remote copy means for the local store.
///
/// `delete_outstanding` is true while a delete for the document is still
/// waiting in the queue.
pub fn resolve(
    collection: &str,
    local: Option<&Document>,
    tombstone: Option<&Tombstone>,
    delete_outstanding: bool,
    remote: &RemoteDocument,
) -> Resolution {
    if let Some(local) = local {
        return merge_documents(local, remote);
    }

    if delete_outstanding {
        return Resolution::Suppressed;
    }

    match tombstone {
        Some(tombstone) if tombstone.shadows(remote.updated_at) => Resolution::Suppressed,
        _ => Resolution::AdoptRemote(remote.clone().into_document(collection)),
    }
}
