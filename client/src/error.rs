//! Unified error handling for the client.

use crate::config::ConfigError;
use crate::remote::RemoteError;
use gardensync_engine::Seq;

/// Failures of the local persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] gardensync_engine::Error),

    #[error("no signed-in user")]
    Unauthenticated,

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("operation {seq} exhausted its retries")]
    SyncExhausted { seq: Seq },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Engine(gardensync_engine::Error::NotFound { .. })
                | Error::Remote(RemoteError::NotFound { .. })
        )
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Error::Engine(gardensync_engine::Error::DuplicateKey { .. }))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Engine(e) if e.is_validation())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.into())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::Storage(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.into())
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
