//! Component wiring.

use crate::auth::AuthState;
use crate::config::{ConfigError, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::local::{LocalStore, MemoryLocalStore, SqliteLocalStore};
use crate::remote::RemoteStore;
use crate::repository::Repository;
use crate::sync::{InFlight, SyncEngine, SyncHandle, SyncTrigger};
use gardensync_engine::{Clock, SystemClock};
use std::sync::Arc;

/// Handles shared by the repository and the sync engine.
#[derive(Clone)]
pub struct ClientState {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub auth: Arc<AuthState>,
    pub clock: Arc<dyn Clock>,
    pub trigger: SyncTrigger,
    pub in_flight: InFlight,
}

impl ClientState {
    /// Online, signed out, on the system clock.
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote,
            connectivity: ConnectivityMonitor::new_shared(true),
            auth: AuthState::new_shared(),
            clock: Arc::new(SystemClock),
            trigger: SyncTrigger::new(),
            in_flight: InFlight::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_auth(mut self, auth: Arc<AuthState>) -> Self {
        self.auth = auth;
        self
    }
}

/// Open the local store named by `database_url`.
///
/// `sqlite:` URLs open (and migrate) a database, `memory:` gives a volatile
/// store and `file:<path>` a snapshot-file store.
pub async fn open_local_store(
    database_url: &str,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn LocalStore>> {
    if database_url.starts_with("sqlite:") {
        let store = SqliteLocalStore::connect_with_clock(database_url, clock).await?;
        return Ok(Arc::new(store));
    }
    if database_url == "memory:" {
        return Ok(Arc::new(MemoryLocalStore::with_clock(clock)));
    }
    if let Some(path) = database_url.strip_prefix("file:") {
        return Ok(Arc::new(MemoryLocalStore::open(path, clock).await?));
    }

    Err(ConfigError::InvalidValue {
        name: "GARDENSYNC_DATABASE_URL",
        value: database_url.to_string(),
    }
    .into())
}

/// The assembled client: data service plus background sync.
pub struct SyncClient {
    state: ClientState,
    repository: Arc<Repository>,
    engine: Arc<SyncEngine>,
    handle: Option<SyncHandle>,
}

impl SyncClient {
    pub fn new(state: ClientState, config: &SyncConfig) -> Self {
        let repository = Arc::new(Repository::new(state.clone()));
        let engine = Arc::new(SyncEngine::new(state.clone(), config));
        Self {
            state,
            repository,
            engine,
            handle: None,
        }
    }

    /// Build a client on the local store named by the configuration.
    pub async fn open(config: &SyncConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let local = open_local_store(&config.database_url, clock.clone()).await?;
        tracing::info!(database_url = %config.database_url, "local store opened");
        Ok(Self::new(ClientState::new(local, remote).with_clock(clock), config))
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.state.connectivity
    }

    pub fn auth(&self) -> &Arc<AuthState> {
        &self.state.auth
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.state.local
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start background sync. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        if self.handle.is_none() {
            tracing::debug!("starting sync loop");
            self.handle = Some(self.engine.start());
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}
