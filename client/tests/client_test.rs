//! End-to-end tests of the assembled client and its background loop.

mod common;

use common::{task, START, USER};
use gardensync_client::{
    ClientState, ConnectivityMonitor, Error, LocalStore, MemoryLocalStore, MemoryRemoteStore,
    SyncClient, SyncConfig, User,
};
use gardensync_engine::{ManualClock, QueueStatus, SyncStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn slow_loop() -> SyncConfig {
    SyncConfig {
        sync_interval: Duration::from_secs(3_600),
        ..SyncConfig::default()
    }
}

fn client(online: bool) -> (SyncClient, Arc<MemoryLocalStore>, Arc<MemoryRemoteStore>) {
    let clock = Arc::new(ManualClock::new(START));
    let local = Arc::new(MemoryLocalStore::with_clock(clock.clone()));
    let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
    let state = ClientState::new(local.clone(), remote.clone())
        .with_clock(clock)
        .with_connectivity(ConnectivityMonitor::new_shared(online));
    state.auth.sign_in(User::new(USER));
    (SyncClient::new(state, &slow_loop()), local, remote)
}

async fn is_synced(local: &MemoryLocalStore, id: &str) -> bool {
    matches!(
        local.get("tasks", id).await,
        Ok(Some(doc)) if doc.sync_status == SyncStatus::Synced
    )
}

#[tokio::test]
async fn reconnect_drains_offline_writes() {
    let (mut client, local, remote) = client(false);
    client.start();
    assert!(client.is_running());

    let id = client
        .repository()
        .add("tasks", task("Cover strawberries"))
        .await
        .unwrap();
    assert!(!is_synced(&local, &id).await);

    client.connectivity().set_online(true);
    eventually(|| {
        let local = Arc::clone(&local);
        let id = id.clone();
        async move { is_synced(&local, &id).await }
    })
    .await;
    assert!(remote.peek(USER, "tasks", &id).is_some());

    client.shutdown().await;
    assert!(!client.is_running());
}

#[tokio::test]
async fn failed_write_through_is_retried_on_demand() {
    let (mut client, local, remote) = client(true);
    client.start();

    remote.fail_next(1);
    client
        .repository()
        .add_with_id("tasks", "t1", task("Pick courgettes"))
        .await
        .unwrap();

    eventually(|| {
        let local = Arc::clone(&local);
        async move { is_synced(&local, "t1").await }
    })
    .await;
    assert!(local
        .operations_with_status(QueueStatus::Pending)
        .await
        .unwrap()
        .is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn sign_in_triggers_drain() {
    let (mut client, local, _remote) = client(true);
    client.connectivity().set_online(false);
    client
        .repository()
        .add_with_id("tasks", "t1", task("Net cabbages"))
        .await
        .unwrap();
    client.auth().sign_out();
    client.connectivity().set_online(true);

    client.start();
    client.auth().sign_in(User::new(USER));

    eventually(|| {
        let local = Arc::clone(&local);
        async move { is_synced(&local, "t1").await }
    })
    .await;

    client.shutdown().await;
}

#[tokio::test]
async fn snapshot_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        database_url: format!("file:{}", dir.path().join("garden.json").display()),
        ..slow_loop()
    };
    let remote = Arc::new(MemoryRemoteStore::new());

    let client = SyncClient::open(&config, remote.clone()).await.unwrap();
    client.auth().sign_in(User::new(USER));
    client.connectivity().set_online(false);
    client
        .repository()
        .add_with_id("tasks", "t1", task("Label rows"))
        .await
        .unwrap();
    drop(client);

    let client = SyncClient::open(&config, remote.clone()).await.unwrap();
    let pending = client
        .local()
        .operations_with_status(QueueStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].document_id, "t1");

    client.auth().sign_in(User::new(USER));
    let report = client.engine().sync_pending_changes().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(remote.peek(USER, "tasks", "t1").is_some());
}

#[tokio::test]
async fn opens_sqlite_and_rejects_unknown_urls() {
    let config = SyncConfig {
        database_url: "sqlite::memory:".to_string(),
        ..slow_loop()
    };
    let client = SyncClient::open(&config, MemoryRemoteStore::new_shared())
        .await
        .unwrap();
    client.auth().sign_in(User::new(USER));
    client
        .repository()
        .add_with_id("plots", "p1", task("North bed"))
        .await
        .unwrap();
    assert!(client.local().get("plots", "p1").await.unwrap().is_some());

    let config = SyncConfig {
        database_url: "postgres://localhost/garden".to_string(),
        ..slow_loop()
    };
    let result = SyncClient::open(&config, MemoryRemoteStore::new_shared()).await;
    assert!(matches!(result, Err(Error::Config(_))));
}
