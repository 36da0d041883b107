//! Background replay of queued writes.
//!
//! A drain walks the pending queue in `seq` order and replays each operation
//! against the remote store. Operations for one document never overtake each
//! other: once an operation for a document is failed, in flight or waiting
//! out its backoff, every later operation for that document waits too.
//!
//! Direct writes from the repository and drains share one [`InFlight`] set,
//! so at most one delivery per document is on the wire at a time.

use crate::app::ClientState;
use crate::auth::User;
use crate::config::SyncConfig;
use crate::error::{Error, Result, StorageError};
use crate::observers::{Observers, SubscriptionId};
use crate::remote::RemoteStore;
use dashmap::DashSet;
use gardensync_engine::{
    CollectionName, DocumentId, OperationKind, PendingOperation, QueueStatus, RetryOutcome,
    RetryPolicy, Seq, Timestamp, UserSettings,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sync progress as broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub state: SyncState,
    /// Operations claimed and sent
    pub attempted: usize,
    pub completed: usize,
    /// Failed but scheduled for another attempt
    pub rescheduled: usize,
    /// Failed for the last time
    pub exhausted: usize,
    /// Blocked behind an earlier operation or not yet due
    pub skipped: usize,
    /// Completed operations purged after the pass
    pub purged: usize,
}

impl DrainReport {
    fn idle() -> Self {
        Self::default()
    }
}

/// Requests an on-demand drain.
///
/// Requests made while a drain runs are remembered and start one more drain
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await
    }
}

type DocumentKey = (CollectionName, DocumentId);

/// Documents with a delivery on its way to the remote store.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<DashSet<DocumentKey>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a document for one delivery. `None` if another holds it.
    pub fn try_claim(&self, collection: &str, id: &str) -> Option<InFlightClaim> {
        let key = (collection.to_string(), id.to_string());
        self.keys.insert(key.clone()).then(|| InFlightClaim {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.keys.contains(&(collection.to_string(), id.to_string()))
    }
}

/// Releases its document when dropped, including on unwind.
#[derive(Debug)]
pub struct InFlightClaim {
    keys: Arc<DashSet<DocumentKey>>,
    key: DocumentKey,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

/// Replay one operation against the remote store.
///
/// Returns the server timestamp for writes. Deleting a document the remote
/// store no longer has counts as delivered.
pub(crate) async fn deliver(
    remote: &dyn RemoteStore,
    uid: &str,
    op: &PendingOperation,
) -> Result<Option<Timestamp>> {
    let payload = || {
        op.payload.as_ref().ok_or_else(|| {
            Error::Storage(StorageError::Corrupt(format!(
                "{} operation {} has no payload",
                op.kind, op.seq
            )))
        })
    };

    match op.kind {
        OperationKind::Add => {
            let ts = remote
                .set(uid, &op.collection, &op.document_id, &payload()?.fields)
                .await?;
            Ok(Some(ts))
        }
        OperationKind::Update => {
            let ts = remote
                .update(uid, &op.collection, &op.document_id, &payload()?.fields)
                .await?;
            Ok(Some(ts))
        }
        OperationKind::Delete => match remote.delete(uid, &op.collection, &op.document_id).await {
            Ok(()) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        },
    }
}

/// Clears the single-flight flag on every exit path, including unwinding.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays the pending queue when connectivity and auth allow.
pub struct SyncEngine {
    state: ClientState,
    policy: RetryPolicy,
    retention_ms: u64,
    interval: Duration,
    listeners: Observers<SyncState>,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(state: ClientState, config: &SyncConfig) -> Self {
        Self {
            state,
            policy: config.retry,
            retention_ms: config.retention_ms(),
            interval: config.sync_interval,
            listeners: Observers::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn trigger(&self) -> &SyncTrigger {
        &self.state.trigger
    }

    pub fn add_sync_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Arc::new(listener))
    }

    pub fn remove_sync_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn broadcast(&self, state: SyncState) {
        self.listeners.notify(&state);
    }

    fn reachable_user(&self) -> Option<User> {
        if !self.state.connectivity.is_online() {
            return None;
        }
        self.state.auth.current_user()
    }

    /// Run one drain of the pending queue.
    pub async fn sync_pending_changes(&self) -> Result<DrainReport> {
        let Some(user) = self.reachable_user() else {
            tracing::debug!("offline or signed out, skipping drain");
            self.broadcast(SyncState::Idle);
            return Ok(DrainReport::idle());
        };

        let Some(_guard) = DrainGuard::acquire(&self.running) else {
            tracing::debug!("drain already running");
            return Ok(DrainReport::idle());
        };

        self.broadcast(SyncState::Syncing);

        match self.drain(&user).await {
            Ok(report) => {
                tracing::info!(
                    attempted = report.attempted,
                    completed = report.completed,
                    rescheduled = report.rescheduled,
                    exhausted = report.exhausted,
                    skipped = report.skipped,
                    purged = report.purged,
                    "drain finished"
                );
                self.broadcast(report.state);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "drain failed");
                self.broadcast(SyncState::Error);
                Err(e)
            }
        }
    }

    async fn drain(&self, user: &User) -> Result<DrainReport> {
        let local = &self.state.local;
        let mut report = DrainReport::idle();

        let in_flight = &self.state.in_flight;
        let recovered = local
            .requeue_in_progress(&|collection, id| in_flight.contains(collection, id))
            .await?;
        if recovered > 0 {
            tracing::warn!(recovered, "requeued operations left in progress");
        }

        // Oldest parked operation per document; later operations wait behind it.
        let mut parked: HashMap<(String, String), Seq> = HashMap::new();
        for op in local.operations_with_status(QueueStatus::Failed).await? {
            parked.entry(op.key()).or_insert(op.seq);
        }

        let pending = local.operations_with_status(QueueStatus::Pending).await?;
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for queued in pending {
            let key = queued.key();
            let behind_parked = parked.get(&key).is_some_and(|&seq| seq < queued.seq);

            if blocked.contains(&key) || behind_parked || !queued.is_due(self.state.clock.now()) {
                report.skipped += 1;
                blocked.insert(key);
                continue;
            }

            if self.reachable_user().is_none() {
                tracing::debug!("lost connectivity mid-drain");
                break;
            }

            // a direct write for this document is on the wire
            let Some(_claim) = in_flight.try_claim(&key.0, &key.1) else {
                report.skipped += 1;
                blocked.insert(key);
                continue;
            };

            let Some(mut op) = local.claim_operation(queued.seq).await? else {
                continue;
            };
            report.attempted += 1;

            match deliver(self.state.remote.as_ref(), &user.uid, &op).await {
                Ok(confirmed_at) => {
                    op.complete(self.state.clock.now());
                    local.save_operation(&op).await?;
                    report.completed += 1;
                    tracing::debug!(
                        seq = op.seq,
                        collection = %op.collection,
                        id = %op.document_id,
                        kind = %op.kind,
                        "delivered"
                    );

                    if let (Some(doc), Some(ts)) = (&op.payload, confirmed_at) {
                        if !local.has_outstanding(&op.collection, &op.document_id).await? {
                            local
                                .mark_synced(&op.collection, &op.document_id, doc.updated_at, ts)
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    let outcome = op.record_failure(e.to_string(), self.state.clock.now(), &self.policy);
                    local.save_operation(&op).await?;
                    blocked.insert(key);

                    match outcome {
                        RetryOutcome::Rescheduled(at) => {
                            report.rescheduled += 1;
                            tracing::warn!(
                                seq = op.seq,
                                attempt = op.attempt_count,
                                next_retry_at = at,
                                error = %e,
                                "delivery failed, will retry"
                            );
                        }
                        RetryOutcome::Exhausted => {
                            report.exhausted += 1;
                            tracing::warn!(
                                seq = op.seq,
                                attempt = op.attempt_count,
                                error = %e,
                                "delivery failed, giving up"
                            );
                        }
                    }
                }
            }
        }

        let now = self.state.clock.now();
        let cutoff = now.saturating_sub(self.retention_ms);
        report.purged = local.purge_completed(cutoff).await?;
        let tombstones = local.purge_tombstones(cutoff).await?;
        if tombstones > 0 {
            tracing::debug!(tombstones, "purged settled tombstones");
        }

        let mut settings = local
            .load_settings(&user.uid)
            .await?
            .unwrap_or_else(|| UserSettings::new(user.uid.clone()));
        settings.last_sync_at = Some(now);
        local.save_settings(&settings).await?;

        report.state = if report.completed > 0 {
            SyncState::Synced
        } else {
            SyncState::Idle
        };
        Ok(report)
    }

    /// Manually requeue a failed operation and request a drain.
    ///
    /// Returns false if the operation is not failed.
    pub async fn retry_failed(&self, seq: Seq) -> Result<bool> {
        let requeued = self.state.local.requeue_failed(seq).await?;
        if requeued {
            tracing::info!(seq, "failed operation requeued");
            self.state.trigger.request();
        }
        Ok(requeued)
    }

    /// `Err(SyncExhausted)` if a write for the document has given up.
    pub async fn check_delivery(&self, collection: &str, id: &str) -> Result<()> {
        let failed = self
            .state
            .local
            .operations_for(collection, id)
            .await?
            .into_iter()
            .find(|op| op.status == QueueStatus::Failed);

        match failed {
            Some(op) => Err(Error::SyncExhausted { seq: op.seq }),
            None => Ok(()),
        }
    }

    /// Spawn the periodic, reconnect, sign-in and on-demand triggers.
    ///
    /// Subscribing reports the current state at once, so a client that
    /// starts online and signed in drains immediately.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let trigger = self.state.trigger.clone();
        let connectivity_sub = self.state.connectivity.subscribe(move |online| {
            if *online {
                trigger.request();
            }
        });

        let trigger = self.state.trigger.clone();
        let auth_sub = self.state.auth.subscribe(move |user| {
            if user.is_some() {
                trigger.request();
            }
        });

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                    _ = engine.state.trigger.requested() => {}
                }
                // failures are logged and broadcast by the drain itself
                let _ = engine.sync_pending_changes().await;
            }
            tracing::debug!("sync loop stopped");
        });

        SyncHandle {
            engine: Arc::clone(self),
            connectivity_sub,
            auth_sub,
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Handle to the running sync loop.
pub struct SyncHandle {
    engine: Arc<SyncEngine>,
    connectivity_sub: SubscriptionId,
    auth_sub: SubscriptionId,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop and drop its subscriptions. Waits for a running drain.
    pub async fn shutdown(mut self) {
        self.engine
            .state
            .connectivity
            .unsubscribe(self.connectivity_sub);
        self.engine.state.auth.unsubscribe(self.auth_sub);

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "sync loop ended abnormally");
        }
    }
}
