//! Single-flight drains and listener isolation.

mod common;

use common::{task, Harness, ScriptedRemote, START, USER};
use gardensync_client::{
    ClientState, LocalStore, MemoryLocalStore, Repository, SyncConfig, SyncEngine, SyncState, User,
};
use gardensync_engine::{ManualClock, OperationKind, QueueStatus, SyncStatus};
use std::sync::{Arc, Mutex};

struct Scripted {
    local: Arc<MemoryLocalStore>,
    remote: Arc<ScriptedRemote>,
    repo: Arc<Repository>,
    engine: Arc<SyncEngine>,
}

fn scripted() -> Scripted {
    let clock = Arc::new(ManualClock::new(START));
    let local = Arc::new(MemoryLocalStore::with_clock(clock.clone()));
    let remote = Arc::new(ScriptedRemote::with_clock(clock.clone()));
    let state = ClientState::new(local.clone(), remote.clone()).with_clock(clock);
    state.auth.sign_in(User::new(USER));

    Scripted {
        local,
        remote,
        repo: Arc::new(Repository::new(state.clone())),
        engine: Arc::new(SyncEngine::new(state, &SyncConfig::default())),
    }
}

#[tokio::test]
async fn concurrent_drain_is_refused_without_broadcast() {
    let s = scripted();
    s.remote.inner.set_available(false);
    // queued because the write-through fails
    s.repo.add_with_id("tasks", "t1", task("Thin seedlings")).await.unwrap();
    s.remote.inner.set_available(true);
    s.remote.hold_writes(true);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    s.engine
        .add_sync_listener(move |state| sink.lock().unwrap().push(*state));

    let engine = Arc::clone(&s.engine);
    let first = tokio::spawn(async move { engine.sync_pending_changes().await });
    s.remote.entered.notified().await;

    let second = s.engine.sync_pending_changes().await.unwrap();
    assert_eq!(second.attempted, 0);
    assert_eq!(second.state, SyncState::Idle);
    assert_eq!(*seen.lock().unwrap(), vec![SyncState::Syncing]);

    s.remote.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.completed, 1);
    assert_eq!(*seen.lock().unwrap(), vec![SyncState::Syncing, SyncState::Synced]);
}

#[tokio::test]
async fn delete_during_a_direct_write_is_delivered_after_it() {
    let s = scripted();
    s.remote.hold_writes(true);

    let repo = Arc::clone(&s.repo);
    let add = tokio::spawn(async move { repo.add_with_id("tasks", "t1", task("Water")).await });
    s.remote.entered.notified().await;

    s.repo.delete("tasks", "t1").await.unwrap();
    let queued = s.local.operations_with_status(QueueStatus::Pending).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, OperationKind::Delete);

    // the add is still on the wire, so a drain leaves the document alone
    let report = s.engine.sync_pending_changes().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        s.local
            .operations_with_status(QueueStatus::InProgress)
            .await
            .unwrap()
            .len(),
        1
    );

    s.remote.hold_writes(false);
    s.remote.release.notify_one();
    add.await.unwrap().unwrap();
    assert!(s.remote.inner.peek(USER, "tasks", "t1").is_some());

    let report = s.engine.sync_pending_changes().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(s.remote.inner.peek(USER, "tasks", "t1").is_none());
    assert!(s.local.get("tasks", "t1").await.unwrap().is_none());
    assert!(s
        .local
        .operations_with_status(QueueStatus::Pending)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn drain_after_a_panicking_pass_recovers() {
    let s = scripted();
    s.remote.inner.set_available(false);
    s.repo.add_with_id("tasks", "t1", task("Turn compost")).await.unwrap();
    s.remote.inner.set_available(true);

    s.remote.panic_next_write();
    let engine = Arc::clone(&s.engine);
    let crashed = tokio::spawn(async move { engine.sync_pending_changes().await }).await;
    assert!(crashed.unwrap_err().is_panic());
    assert_eq!(
        s.local
            .operations_with_status(QueueStatus::InProgress)
            .await
            .unwrap()
            .len(),
        1
    );

    let report = s.engine.sync_pending_changes().await.unwrap();
    assert_eq!(report.completed, 1);
    let doc = s.local.get("tasks", "t1").await.unwrap().unwrap();
    assert_eq!(doc.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn panicking_listener_does_not_block_others() {
    let h = Harness::memory();
    h.engine.add_sync_listener(|_| panic!("listener bug"));
    let seen = h.record_states();

    h.go_offline();
    h.repo.add_with_id("tasks", "t1", task("Water")).await.unwrap();
    h.go_online();
    let report = h.drain().await;

    assert_eq!(report.completed, 1);
    assert_eq!(*seen.lock().unwrap(), vec![SyncState::Syncing, SyncState::Synced]);
}

#[tokio::test]
async fn removed_listener_hears_nothing() {
    let h = Harness::memory();
    let seen = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&seen);
    let id = h
        .engine
        .add_sync_listener(move |_| *sink.lock().unwrap() += 1);

    h.drain().await;
    assert!(h.engine.remove_sync_listener(id));
    h.drain().await;

    assert_eq!(*seen.lock().unwrap(), 2);
    assert!(!h.engine.remove_sync_listener(id));
}
