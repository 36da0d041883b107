//! The authoritative cloud document store.

mod memory;

pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use gardensync_engine::{CollectionName, DocumentId, Fields, RemoteDocument, Timestamp};

/// Remote store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("remote document not found: {collection}/{id}")]
    NotFound {
        collection: CollectionName,
        id: DocumentId,
    },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Document operations of the remote store.
///
/// Every call is scoped to one account: `uid` names the signed-in user whose
/// documents live under `users/{uid}/{collection}`. Implementations must never
/// let one account read or write another's documents.
///
/// `set` and `update` return the server-assigned `updatedAt`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, uid: &str, collection: &str, id: &str)
        -> RemoteResult<Option<RemoteDocument>>;

    /// Create or replace a document.
    async fn set(&self, uid: &str, collection: &str, id: &str, fields: &Fields)
        -> RemoteResult<Timestamp>;

    /// Replace the fields of an existing document.
    async fn update(&self, uid: &str, collection: &str, id: &str, fields: &Fields)
        -> RemoteResult<Timestamp>;

    async fn delete(&self, uid: &str, collection: &str, id: &str) -> RemoteResult<()>;

    async fn get_all(&self, uid: &str, collection: &str) -> RemoteResult<Vec<RemoteDocument>>;
}
