//! # GardenSync Client
//!
//! Offline-first data service for the garden planner.
//!
//! Writes land in a durable [`LocalStore`] immediately and are replayed
//! against the [`RemoteStore`] by the [`SyncEngine`] whenever the client is
//! online and signed in. Reads merge the remote copy into local state with
//! the engine's last-writer-wins rules, never overwriting an unsynced edit.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gardensync_client::{ClientState, MemoryLocalStore, MemoryRemoteStore, SyncClient, SyncConfig, User};
//! use gardensync_engine::fields;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> gardensync_client::Result<()> {
//! let state = ClientState::new(
//!     Arc::new(MemoryLocalStore::new()),
//!     MemoryRemoteStore::new_shared(),
//! );
//! let mut client = SyncClient::new(state, &SyncConfig::default());
//! client.auth().sign_in(User::new("gardener-1"));
//! client.start();
//!
//! let id = client
//!     .repository()
//!     .add("tasks", fields(json!({"title": "Water the tomatoes"})))
//!     .await?;
//! let task = client.repository().get_by_id("tasks", &id).await?;
//! assert_eq!(task.field("title"), Some(&json!("Water the tomatoes")));
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod auth;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod local;
pub mod observers;
pub mod remote;
pub mod repository;
pub mod sync;
pub mod telemetry;

pub use app::{open_local_store, ClientState, SyncClient};
pub use auth::{AuthState, User};
pub use config::{ConfigError, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use error::{Error, Result, StorageError};
pub use local::{DocumentEdit, InFlightCheck, LocalStore, MemoryLocalStore, SqliteLocalStore};
pub use observers::{Observers, SubscriptionId};
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore};
pub use repository::Repository;
pub use sync::{
    DrainReport, InFlight, InFlightClaim, SyncEngine, SyncHandle, SyncState, SyncTrigger,
};
