//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gardensync_client::remote::RemoteResult;
use gardensync_client::{
    ClientState, DrainReport, LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore,
    Repository, SqliteLocalStore, SyncConfig, SyncEngine, SyncState, User,
};
use gardensync_engine::{
    fields, Clock, Document, Fields, ManualClock, PendingOperation, QueueStatus, RemoteDocument,
    Timestamp,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const START: Timestamp = 1_700_000_000_000;
pub const USER: &str = "gardener-1";

pub const MINUTE: u64 = 60 * 1_000;
pub const HOUR: u64 = 60 * MINUTE;

pub fn task(title: &str) -> Fields {
    fields(json!({ "title": title }))
}

/// One client wired to an in-memory remote store, online and signed in.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub state: ClientState,
    pub repo: Repository,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub fn memory() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let local = Arc::new(MemoryLocalStore::with_clock(clock.clone()));
        Self::build(clock, local)
    }

    pub async fn sqlite() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let local = SqliteLocalStore::connect_with_clock("sqlite::memory:", clock.clone())
            .await
            .expect("open sqlite store");
        Self::build(clock, Arc::new(local))
    }

    fn build(clock: Arc<ManualClock>, local: Arc<dyn LocalStore>) -> Self {
        let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
        let state = ClientState::new(local.clone(), remote.clone()).with_clock(clock.clone());
        state.auth.sign_in(User::new(USER));

        let repo = Repository::new(state.clone());
        let engine = Arc::new(SyncEngine::new(state.clone(), &SyncConfig::default()));

        Self {
            clock,
            local,
            remote,
            state,
            repo,
            engine,
        }
    }

    pub fn go_offline(&self) {
        self.state.connectivity.set_online(false);
    }

    pub fn go_online(&self) {
        self.state.connectivity.set_online(true);
    }

    pub async fn drain(&self) -> DrainReport {
        self.engine
            .sync_pending_changes()
            .await
            .expect("drain should not fail")
    }

    pub async fn ops(&self, status: QueueStatus) -> Vec<PendingOperation> {
        self.local
            .operations_with_status(status)
            .await
            .expect("read queue")
    }

    pub async fn doc(&self, collection: &str, id: &str) -> Option<Document> {
        self.local.get(collection, id).await.expect("read document")
    }

    /// Seed a remote document as another device would have written it.
    pub fn remote_write(&self, collection: &str, id: &str, title: &str, updated_at: Timestamp) {
        self.remote
            .insert(USER, collection, RemoteDocument::new(id, task(title), updated_at));
    }

    /// Collect every sync status broadcast from now on.
    pub fn record_states(&self) -> Arc<Mutex<Vec<SyncState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.engine
            .add_sync_listener(move |state| sink.lock().unwrap().push(*state));
        seen
    }
}

/// Remote store whose writes can be held open or made to panic.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    pub inner: MemoryRemoteStore,
    /// Signalled when a held write has started
    pub entered: Notify,
    /// Lets a held write finish
    pub release: Notify,
    hold: AtomicBool,
    panic_next: AtomicBool,
}

impl ScriptedRemote {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryRemoteStore::with_clock(clock),
            ..Default::default()
        }
    }

    pub fn hold_writes(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn panic_next_write(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    async fn before_write(&self) {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("remote write blew up");
        }
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn get(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
    ) -> RemoteResult<Option<RemoteDocument>> {
        self.inner.get(uid, collection, id).await
    }

    async fn set(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<Timestamp> {
        self.before_write().await;
        self.inner.set(uid, collection, id, fields).await
    }

    async fn update(
        &self,
        uid: &str,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<Timestamp> {
        self.before_write().await;
        self.inner.update(uid, collection, id, fields).await
    }

    async fn delete(&self, uid: &str, collection: &str, id: &str) -> RemoteResult<()> {
        self.before_write().await;
        self.inner.delete(uid, collection, id).await
    }

    async fn get_all(&self, uid: &str, collection: &str) -> RemoteResult<Vec<RemoteDocument>> {
        self.inner.get_all(uid, collection).await
    }
}
