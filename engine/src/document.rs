//! Document types for stored entities.

use crate::{error::Result, CollectionName, DocumentId, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered mapping from field name to value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Replication state of a local document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local and remote agreed at the last reconciliation
    Synced,
    /// Local edits not yet confirmed remotely
    #[default]
    Pending,
    /// Irreconcilable simultaneous edits, surfaced to the caller
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// A document in a local collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique within its collection
    pub id: DocumentId,
    /// Collection this document belongs to
    pub collection: CollectionName,
    /// Domain payload
    pub fields: Fields,
    /// First local write (milliseconds since epoch, 0 = unset)
    pub created_at: Timestamp,
    /// Last write, local wall-clock or server-confirmed (0 = unset)
    pub updated_at: Timestamp,
    /// Replication state
    pub sync_status: SyncStatus,
}

impl Document {
    /// Create a pending document with unset timestamps.
    pub fn new(
        id: impl Into<DocumentId>,
        collection: impl Into<CollectionName>,
        fields: Fields,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            fields,
            created_at: 0,
            updated_at: 0,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Set both timestamps.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.created_at = timestamp;
        self.updated_at = timestamp;
        self
    }

    /// Set the sync status.
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// Shallow merge: every key in `partial` overwrites the current value.
    ///
    /// A `null` in `partial` is stored as `null`; keys absent from `partial`
    /// are left untouched.
    pub fn merge_partial(&mut self, partial: &Fields) {
        for (key, value) in partial {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// A document as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: DocumentId,
    pub fields: Fields,
    /// Server creation time, when the store reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Server-assigned update time
    pub updated_at: Timestamp,
}

impl RemoteDocument {
    pub fn new(id: impl Into<DocumentId>, fields: Fields, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            fields,
            created_at: None,
            updated_at,
        }
    }

    /// Convert into a synced local document.
    pub fn into_document(self, collection: impl Into<CollectionName>) -> Document {
        Document {
            id: self.id,
            collection: collection.into(),
            fields: self.fields,
            created_at: self.created_at.unwrap_or(self.updated_at),
            updated_at: self.updated_at,
            sync_status: SyncStatus::Synced,
        }
    }
}

/// Build a [`Fields`] map from a JSON object literal.
///
/// Non-object values produce an empty map.
pub fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Fields::new(),
    }
}
