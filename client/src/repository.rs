//! Collection-agnostic data service.
//!
//! Every write lands in the local store and the queue first. When the client
//! is reachable (online and signed in) and the new operation is the oldest
//! outstanding one for its document, it is also sent straight to the remote
//! store; otherwise, or if that fails, the sync engine picks it up.

use crate::app::ClientState;
use crate::auth::User;
use crate::error::{Error, Result};
use crate::local::DocumentEdit;
use crate::sync::deliver;
use dashmap::DashMap;
use gardensync_engine::{
    CollectionName, Document, DocumentId, Fields, PendingOperation, SyncStatus, Task, Validator,
    TASKS,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Repository {
    state: ClientState,
    validators: DashMap<CollectionName, Arc<dyn Validator>>,
    /// Held across a local write and its enqueue, never across network IO
    write_lock: Mutex<()>,
}

impl Repository {
    pub fn new(state: ClientState) -> Self {
        Self {
            state,
            validators: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Install the validator run before every write to `collection`.
    pub fn register_validator(&self, collection: impl Into<CollectionName>, validator: Arc<dyn Validator>) {
        self.validators.insert(collection.into(), validator);
    }

    /// The signed-in user, if the remote store can be reached for them.
    fn reachable_user(&self) -> Option<User> {
        if !self.state.connectivity.is_online() {
            return None;
        }
        self.state.auth.current_user()
    }

    fn require_user(&self) -> Result<User> {
        self.state.auth.current_user().ok_or(Error::Unauthenticated)
    }

    fn validator(&self, collection: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(collection).map(|v| Arc::clone(v.value()))
    }

    fn validate(&self, collection: &str, fields: &Fields) -> Result<()> {
        if let Some(validator) = self.validator(collection) {
            validator.validate(collection, fields)?;
        }
        Ok(())
    }

    /// All documents in a collection, merged with the remote copy when reachable.
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        let local = self.state.local.get_all(collection).await?;
        let Some(user) = self.reachable_user() else {
            return Ok(local);
        };

        let remote = match self.state.remote.get_all(&user.uid, collection).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(collection, error = %e, "remote fetch failed, serving local copy");
                return Ok(local);
            }
        };

        let mut merged: BTreeMap<DocumentId, Document> =
            local.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
        for remote_doc in &remote {
            if let Some(doc) = self.state.local.apply_remote(collection, remote_doc).await? {
                merged.insert(doc.id.clone(), doc);
            }
        }
        Ok(merged.into_values().collect())
    }

    pub async fn get_by_id(&self, collection: &str, id: &str) -> Result<Document> {
        let local = self.state.local.get(collection, id).await?;
        let not_found = || Error::Engine(gardensync_engine::Error::not_found(collection, id));

        let Some(user) = self.reachable_user() else {
            return local.ok_or_else(not_found);
        };

        match self.state.remote.get(&user.uid, collection, id).await {
            Ok(Some(remote)) => self
                .state
                .local
                .apply_remote(collection, &remote)
                .await?
                .ok_or_else(not_found),
            Ok(None) => local.ok_or_else(not_found),
            Err(e) => {
                tracing::warn!(collection, id, error = %e, "remote fetch failed, serving local copy");
                local.ok_or_else(not_found)
            }
        }
    }

    /// Add a document under a generated id.
    pub async fn add(&self, collection: &str, fields: Fields) -> Result<DocumentId> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.add_with_id(collection, &id, fields).await
    }

    pub async fn add_with_id(&self, collection: &str, id: &str, fields: Fields) -> Result<DocumentId> {
        self.require_user()?;
        self.validate(collection, &fields)?;

        let op = {
            let _write = self.write_lock.lock().await;
            let doc = self
                .state
                .local
                .add(Document::new(id, collection, fields))
                .await?;
            tracing::debug!(collection, id, "added locally");
            self.enqueue(PendingOperation::add(doc, self.state.clock.now()))
                .await?
        };

        self.replicate(op).await?;
        Ok(id.to_string())
    }

    /// Shallow-merge `partial` onto an existing document.
    pub async fn update(&self, collection: &str, id: &str, partial: Fields) -> Result<Document> {
        self.require_user()?;
        let validator = self.validator(collection);

        self.edit(collection, id, &mut |doc: &mut Document| {
            doc.merge_partial(&partial);
            if let Some(validator) = &validator {
                validator.validate(collection, &doc.fields)?;
            }
            Ok(())
        })
        .await
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.require_user()?;

        let op = {
            let _write = self.write_lock.lock().await;
            self.state.local.delete(collection, id).await?;
            tracing::debug!(collection, id, "deleted locally");
            self.enqueue(PendingOperation::delete(collection, id, self.state.clock.now()))
                .await?
        };

        self.replicate(op).await
    }

    /// Complete a task, adding its next occurrence if it repeats.
    ///
    /// Returns the id of the new occurrence.
    pub async fn complete_task(&self, id: &str) -> Result<Option<DocumentId>> {
        self.require_user()?;
        // adopt a newer remote copy before editing
        self.get_by_id(TASKS, id).await?;

        let validator = self.validator(TASKS);
        let now = self.state.clock.now();
        let mut next = None;

        self.edit(TASKS, id, &mut |doc: &mut Document| {
            let mut task = Task::from_fields(&doc.fields)?;
            next = task.complete(now);
            task.write_into(&mut doc.fields);
            if let Some(validator) = &validator {
                validator.validate(TASKS, &doc.fields)?;
            }
            Ok(())
        })
        .await?;

        match next {
            Some(next) => {
                let next_id = self.add(TASKS, next.to_fields()).await?;
                tracing::debug!(id, next_id = %next_id, "scheduled next occurrence");
                Ok(Some(next_id))
            }
            None => Ok(None),
        }
    }

    /// Apply `edit` to the stored document in one store call, then replicate it.
    async fn edit(
        &self,
        collection: &str,
        id: &str,
        edit: DocumentEdit<'_>,
    ) -> Result<Document> {
        let (doc, op) = {
            let _write = self.write_lock.lock().await;
            let doc = self
                .state
                .local
                .modify(collection, id, &mut |doc: &mut Document| {
                    edit(doc)?;
                    doc.sync_status = SyncStatus::Pending;
                    Ok(())
                })
                .await?;
            tracing::debug!(collection, id, "updated locally");
            let op = self
                .enqueue(PendingOperation::update(doc.clone(), self.state.clock.now()))
                .await?;
            (doc, op)
        };

        self.replicate(op).await?;

        // a direct write may have confirmed it meanwhile
        Ok(self.state.local.get(collection, id).await?.unwrap_or(doc))
    }

    async fn enqueue(&self, op: PendingOperation) -> Result<PendingOperation> {
        let op = self.state.local.enqueue(op).await?;
        tracing::debug!(
            seq = op.seq,
            collection = %op.collection,
            id = %op.document_id,
            kind = %op.kind,
            "queued"
        );
        Ok(op)
    }

    /// Send a queued write straight to the remote store if it is first in
    /// line for its document.
    async fn replicate(&self, op: PendingOperation) -> Result<()> {
        let local = &self.state.local;
        let Some(user) = self.reachable_user() else {
            return Ok(());
        };

        let Some(claim) = self.state.in_flight.try_claim(&op.collection, &op.document_id) else {
            // another delivery for this document is on the wire
            self.state.trigger.request();
            return Ok(());
        };

        let head = local
            .operations_for(&op.collection, &op.document_id)
            .await?
            .into_iter()
            .find(|queued| queued.status.is_outstanding())
            .map(|queued| queued.seq);

        if head == Some(op.seq) {
            if let Some(mut op) = local.claim_operation(op.seq).await? {
                self.write_through(&user, &mut op).await?;
            }
        }
        drop(claim);

        if local.has_outstanding(&op.collection, &op.document_id).await? {
            self.state.trigger.request();
        }
        Ok(())
    }

    /// Deliver a claimed operation; on failure hand it back to the queue.
    async fn write_through(&self, user: &User, op: &mut PendingOperation) -> Result<()> {
        let local = &self.state.local;

        match deliver(self.state.remote.as_ref(), &user.uid, op).await {
            Ok(confirmed_at) => {
                op.complete(self.state.clock.now());
                local.save_operation(op).await?;

                if let (Some(doc), Some(ts)) = (&op.payload, confirmed_at) {
                    if !local.has_outstanding(&op.collection, &op.document_id).await? {
                        local
                            .mark_synced(&op.collection, &op.document_id, doc.updated_at, ts)
                            .await?;
                    }
                }
                tracing::debug!(
                    seq = op.seq,
                    collection = %op.collection,
                    id = %op.document_id,
                    kind = %op.kind,
                    "written through"
                );
            }
            Err(e) => {
                op.release(e.to_string());
                local.save_operation(op).await?;
                tracing::warn!(
                    seq = op.seq,
                    collection = %op.collection,
                    id = %op.document_id,
                    kind = %op.kind,
                    error = %e,
                    "remote write failed, left queued"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalStore, MemoryLocalStore};
    use crate::remote::MemoryRemoteStore;
    use gardensync_engine::{fields, ManualClock, QueueStatus, TaskRules};
    use serde_json::json;

    fn setup() -> (Repository, Arc<MemoryLocalStore>, Arc<MemoryRemoteStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let local = Arc::new(MemoryLocalStore::with_clock(clock.clone()));
        let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
        let state = ClientState::new(local.clone(), remote.clone()).with_clock(clock);
        state.auth.sign_in(User::new("u1"));
        (Repository::new(state), local, remote)
    }

    #[tokio::test]
    async fn writes_require_a_user() {
        let (repo, local, _) = setup();
        repo.state.auth.sign_out();

        let err = repo
            .add_with_id("tasks", "t1", fields(json!({"title": "Water"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
        assert!(local.get("tasks", "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn online_add_writes_through() {
        let (repo, local, remote) = setup();

        let id = repo.add("tasks", fields(json!({"title": "Water"}))).await.unwrap();
        assert_eq!(id.len(), 32);

        let doc = local.get("tasks", &id).await.unwrap().unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert!(remote.peek("u1", "tasks", &id).is_some());
        assert!(local.operations_with_status(QueueStatus::Pending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_queued() {
        let (repo, local, remote) = setup();
        remote.fail_next(1);

        repo.add_with_id("tasks", "t1", fields(json!({"title": "Water"})))
            .await
            .unwrap();

        let doc = local.get("tasks", "t1").await.unwrap().unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Pending);
        let pending = local.operations_with_status(QueueStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn writes_queue_behind_outstanding_operations() {
        let (repo, local, remote) = setup();
        remote.set_available(false);
        repo.add_with_id("tasks", "t1", fields(json!({"title": "Water"})))
            .await
            .unwrap();

        remote.set_available(true);
        repo.update("tasks", "t1", fields(json!({"title": "Water beds"})))
            .await
            .unwrap();

        let ops = local.operations_for("tasks", "t1").await.unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.status == QueueStatus::Pending));
        assert_eq!(ops[0].attempt_count, 0);
        assert!(remote.peek("u1", "tasks", "t1").is_none());
    }

    #[tokio::test]
    async fn update_merges_and_validates() {
        let (repo, _, _) = setup();
        repo.register_validator(TASKS, Arc::new(TaskRules));

        repo.add_with_id(TASKS, "t1", fields(json!({"title": "Water", "priority": "low"})))
            .await
            .unwrap();

        let doc = repo
            .update(TASKS, "t1", fields(json!({"priority": "high"})))
            .await
            .unwrap();
        assert_eq!(doc.field("title"), Some(&json!("Water")));
        assert_eq!(doc.field("priority"), Some(&json!("high")));

        let err = repo
            .update(TASKS, "t1", fields(json!({"title": ""})))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = repo
            .update(TASKS, "missing", fields(json!({"title": "x"})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn completing_a_legacy_task_rewrites_its_recurrence() {
        let (repo, local, remote) = setup();
        repo.register_validator(TASKS, Arc::new(TaskRules));
        repo.add_with_id(
            TASKS,
            "t1",
            fields(json!({
                "title": "Feed",
                "dueDate": "2024-05-01",
                "recurring": true,
                "recurrencePattern": "every-n-days:3"
            })),
        )
        .await
        .unwrap();

        let next_id = repo.complete_task("t1").await.unwrap().unwrap();

        let stored = local.get(TASKS, "t1").await.unwrap().unwrap();
        assert!(!stored.fields.contains_key("recurrencePattern"));
        assert!(Task::from_fields(&stored.fields).unwrap().completed);
        assert!(!remote.peek("u1", TASKS, "t1").unwrap().fields.contains_key("recurrencePattern"));

        let next = Task::from_fields(&local.get(TASKS, &next_id).await.unwrap().unwrap().fields).unwrap();
        assert_eq!(next.due_date, chrono::NaiveDate::from_ymd_opt(2024, 5, 4));
    }

    #[tokio::test]
    async fn get_all_includes_remote_only_documents() {
        let (repo, local, remote) = setup();
        remote.insert(
            "u1",
            "plots",
            gardensync_engine::RemoteDocument::new("p1", fields(json!({"name": "North"})), 5_000),
        );
        repo.add_with_id("plots", "p2", fields(json!({"name": "South"})))
            .await
            .unwrap();

        let docs = repo.get_all("plots").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(local.get("plots", "p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completing_a_recurring_task_schedules_the_next() {
        let (repo, local, _) = setup();
        let task = Task::new("Water tomatoes")
            .due(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .repeating(gardensync_engine::RecurrencePattern::days(3).unwrap());
        repo.add_with_id(TASKS, "t1", task.to_fields()).await.unwrap();

        let next_id = repo.complete_task("t1").await.unwrap().unwrap();

        let done = Task::from_fields(&local.get(TASKS, "t1").await.unwrap().unwrap().fields).unwrap();
        assert!(done.completed);
        let next = Task::from_fields(&local.get(TASKS, &next_id).await.unwrap().unwrap().fields).unwrap();
        assert!(!next.completed);
        assert_eq!(next.due_date, chrono::NaiveDate::from_ymd_opt(2024, 5, 4));
    }
}
