//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and persistent storage.
//! They are designed for deterministic serialization to ensure consistency.

use crate::{
    error::Result, CollectionName, Document, DocumentId, Error, PendingOperation, Seq, Tombstone,
    UserSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Next queue position to hand out
    pub next_seq: Seq,
    /// All documents organized by collection, then by document ID
    pub collections: BTreeMap<CollectionName, BTreeMap<DocumentId, Document>>,
    /// Retained queue entries in seq order
    #[serde(default)]
    pub queue: Vec<PendingOperation>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
    #[serde(default)]
    pub settings: Vec<UserSettings>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_seq: 1,
            collections: BTreeMap::new(),
            queue: Vec::new(),
            tombstones: Vec::new(),
            settings: Vec::new(),
        }
    }

    /// Add a document to the snapshot.
    pub fn add_document(&mut self, document: Document) {
        self.collections
            .entry(document.collection.clone())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Get a document from the snapshot.
    pub fn get_document(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections.get(collection)?.get(id)
    }

    /// Count total documents across all collections.
    pub fn document_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Count queue entries that still owe the remote store a write.
    pub fn outstanding_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|op| op.status.is_outstanding())
            .count()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::SnapshotVersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                actual: self.format_version,
            });
        }

        for (collection, documents) in &self.collections {
            for (id, document) in documents {
                if &document.collection != collection || &document.id != id {
                    return Err(Error::InvalidSnapshot(format!(
                        "document {}/{} filed under {}/{}",
                        document.collection, document.id, collection, id
                    )));
                }
            }
        }

        let mut last = 0;
        for op in &self.queue {
            if op.seq <= last {
                return Err(Error::InvalidSnapshot(format!(
                    "queue out of order at seq {}",
                    op.seq
                )));
            }
            last = op.seq;
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
