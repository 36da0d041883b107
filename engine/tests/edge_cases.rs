//! Edge case tests for gardensync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use gardensync_engine::{
    fields, merge_documents, reconcile, Document, OperationKind, PendingOperation, QueueStatus,
    RecurrencePattern, RemoteDocument, Resolution, RetryOutcome, RetryPolicy, Store,
    StoreSnapshot, SyncStatus, Task, Tombstone,
};
use proptest::prelude::*;
use serde_json::json;

fn cell(id: &str, x: i64, y: i64) -> Document {
    Document::new(id, "cells", fields(json!({"plotId": "p1", "x": x, "y": y})))
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let mut store = Store::new();
    store
        .add(Document::new("t1", "tasks", fields(json!({"title": ""}))), 1_000)
        .unwrap();

    let doc = store.get("tasks", "t1").unwrap();
    assert_eq!(doc.fields["title"], "");
}

#[test]
fn unicode_ids_and_values() {
    let mut store = Store::new();

    let names = vec![
        "トマト",             // Japanese
        "Помидор",           // Russian
        "🍅🌱",              // Emoji
        "Hello\nWorld\tTab", // Whitespace
        "Null\0Test",        // Embedded null
    ];

    for (i, name) in names.iter().enumerate() {
        let id = format!("{}-{}", name, i);
        store
            .add(Document::new(&id, "plants", fields(json!({"name": name}))), 1_000)
            .unwrap();
        assert_eq!(store.get("plants", &id).unwrap().fields["name"], *name);
    }
    assert_eq!(store.get_all("plants").len(), names.len());
}

#[test]
fn very_long_strings() {
    let mut store = Store::new();
    let notes = "a".repeat(1_000_000);

    store
        .add(Document::new("p1", "plots", fields(json!({"notes": notes}))), 1_000)
        .unwrap();
    assert_eq!(
        store.get("plots", "p1").unwrap().fields["notes"].as_str().unwrap().len(),
        1_000_000
    );
}

// ============================================================================
// Timestamp Edge Cases
// ============================================================================

#[test]
fn timestamps_at_boundaries() {
    let mut store = Store::new();
    let doc = store.add(cell("c1", 0, 0).at(u64::MAX), 1).unwrap();
    assert_eq!(doc.updated_at, u64::MAX);

    // saturates rather than wrapping
    let updated = store.update(doc, 5).unwrap();
    assert_eq!(updated.updated_at, u64::MAX);

    let policy = RetryPolicy::default();
    let mut op = PendingOperation::delete("cells", "c1", 0);
    op.begin();
    assert_eq!(
        op.record_failure("offline", u64::MAX, &policy),
        RetryOutcome::Rescheduled(u64::MAX)
    );
}

#[test]
fn backoff_with_huge_attempt_counts() {
    let policy = RetryPolicy {
        max_retries: u32::MAX,
        base_delay_ms: u64::MAX / 2,
        max_delay_ms: u64::MAX,
    };
    assert_eq!(policy.backoff(0), u64::MAX / 2);
    assert_eq!(policy.backoff(u32::MAX), u64::MAX);
}

// ============================================================================
// JSON Edge Cases
// ============================================================================

#[test]
fn deeply_nested_fields() {
    let mut nested = json!({"value": "deep"});
    for _ in 0..50 {
        nested = json!({"nested": nested});
    }

    let mut store = Store::new();
    store
        .add(Document::new("pl1", "plants", fields(json!({"care": nested}))), 1_000)
        .unwrap();

    let json = store.export_state().to_json().unwrap();
    let restored = StoreSnapshot::from_json(&json).unwrap();
    assert!(restored.get_document("plants", "pl1").is_some());
}

#[test]
fn fields_from_non_object_is_empty() {
    assert!(fields(json!([1, 2, 3])).is_empty());
    assert!(fields(json!("plot")).is_empty());
    assert!(fields(serde_json::Value::Null).is_empty());
}

// ============================================================================
// Queue Ordering Edge Cases
// ============================================================================

#[test]
fn update_then_delete_stays_in_order() {
    let mut store = Store::new();
    let doc = store.add(cell("c1", 0, 0), 1_000).unwrap();

    let update = store.enqueue(PendingOperation::update(doc, 1_001));
    let delete = store.enqueue(PendingOperation::delete("cells", "c1", 1_002));

    let ops = store.operations_for("cells", "c1");
    assert_eq!(
        ops.iter().map(|op| (op.seq, op.kind)).collect::<Vec<_>>(),
        vec![(update.seq, OperationKind::Update), (delete.seq, OperationKind::Delete)]
    );
}

#[test]
fn seq_survives_purge_and_restore() {
    let mut store = Store::new();
    for i in 0..5 {
        let op = store.enqueue(PendingOperation::delete("cells", format!("c{}", i), 0));
        let mut op = store.claim_operation(op.seq).unwrap();
        op.complete(10);
        store.save_operation(&op).unwrap();
    }

    assert_eq!(store.purge_completed(100), 5);
    assert_eq!(store.queue_len(), 0);

    let mut restored = Store::new();
    restored.import_state(store.export_state()).unwrap();
    let next = restored.enqueue(PendingOperation::delete("cells", "c9", 0));
    assert_eq!(next.seq, 6);
}

#[test]
fn many_pending_operations() {
    let mut store = Store::new();
    for i in 0..1_000 {
        store.enqueue(PendingOperation::add(cell(&format!("c{}", i), i, i), i as u64));
    }

    let pending = store.operations_with_status(QueueStatus::Pending);
    assert_eq!(pending.len(), 1_000);
    assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
}

// ============================================================================
// Reconciliation Edge Cases
// ============================================================================

#[test]
fn conflict_status_is_not_protected() {
    let local = cell("c1", 0, 0).at(1_000).with_status(SyncStatus::Conflict);
    let remote = RemoteDocument::new("c1", fields(json!({"x": 9})), 2_000);
    assert!(merge_documents(&local, &remote).is_remote());
}

#[test]
fn remote_resurrection_after_confirmed_delete() {
    let mut store = Store::new();
    store.add(cell("c1", 0, 0).at(1_000), 1_000).unwrap();
    store.delete("cells", "c1", 2_000);

    // stale copy from before the delete
    let stale = RemoteDocument::new("c1", fields(json!({"x": 0})), 1_500);
    assert_eq!(store.apply_remote("cells", &stale), None);

    // genuinely newer write elsewhere
    let fresh = RemoteDocument::new("c1", fields(json!({"x": 3})), 2_500);
    let doc = store.apply_remote("cells", &fresh).unwrap();
    assert_eq!(doc.fields["x"], 3);
    assert!(store.tombstone("cells", "c1").is_none());
}

// ============================================================================
// Recurrence Edge Cases
// ============================================================================

#[test]
fn recurrence_near_date_limits() {
    let last = chrono::NaiveDate::MAX;
    assert_eq!(RecurrencePattern::days(1).unwrap().next_date(last), None);

    let mut task = Task::new("Water").due(last).repeating(RecurrencePattern::days(1).unwrap());
    assert_eq!(task.complete(0), None);
}

// ============================================================================
// Properties
// ============================================================================

fn sync_status() -> impl Strategy<Value = SyncStatus> {
    prop_oneof![
        Just(SyncStatus::Synced),
        Just(SyncStatus::Pending),
        Just(SyncStatus::Conflict),
    ]
}

proptest! {
    #[test]
    fn pending_local_always_wins(local_ts in 0u64..1_000_000, remote_ts in 0u64..1_000_000) {
        let local = cell("c1", 1, 1).at(local_ts);
        let remote = RemoteDocument::new("c1", fields(json!({"x": 2})), remote_ts);
        prop_assert_eq!(merge_documents(&local, &remote), Resolution::KeepLocal);
    }

    #[test]
    fn remote_wins_only_when_strictly_newer(
        status in sync_status(),
        local_ts in 0u64..1_000_000,
        remote_ts in 0u64..1_000_000,
    ) {
        prop_assume!(status != SyncStatus::Pending);
        let local = cell("c1", 1, 1).at(local_ts).with_status(status);
        let remote = RemoteDocument::new("c1", fields(json!({"x": 2})), remote_ts);

        match merge_documents(&local, &remote) {
            Resolution::AdoptRemote(doc) => {
                prop_assert!(remote_ts > local_ts);
                prop_assert_eq!(doc.id, "c1");
                prop_assert_eq!(doc.sync_status, SyncStatus::Synced);
            }
            Resolution::KeepLocal => prop_assert!(remote_ts <= local_ts),
            Resolution::Suppressed => prop_assert!(false, "merge never suppresses"),
        }
    }

    #[test]
    fn outstanding_delete_suppresses_everything(
        deleted_at in 0u64..1_000_000,
        remote_ts in 0u64..u64::MAX,
    ) {
        let tombstone = Tombstone::new("cells", "c1", deleted_at);
        let remote = RemoteDocument::new("c1", fields(json!({})), remote_ts);
        prop_assert_eq!(
            reconcile::resolve("cells", None, Some(&tombstone), true, &remote),
            Resolution::Suppressed
        );
    }

    #[test]
    fn backoff_is_monotonic_and_capped(attempt in 1u32..64) {
        let policy = RetryPolicy::default();
        prop_assert!(policy.backoff(attempt) <= policy.max_delay_ms);
        prop_assert!(policy.backoff(attempt) <= policy.backoff(attempt + 1));
    }

    #[test]
    fn day_recurrence_moves_forward(days in 1u32..4_000) {
        let from = chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let next = RecurrencePattern::days(days).unwrap().next_date(from).unwrap();
        prop_assert_eq!((next - from).num_days(), i64::from(days));
    }
}
