//! # GardenSync Engine
//!
//! The deterministic core of GardenSync's offline-first data layer.
//!
//! This crate holds the rules that decide what the local copy of a garden
//! looks like: documents, the queue of pending remote writes, retry
//! scheduling and the merge of remote copies into local state. It knows
//! nothing of storage backends or the network, and it never reads the clock
//! itself: every timestamp is an argument.
//!
//! ## Design Principles
//!
//! - **No IO**: the runtime crate owns persistence and transport
//! - **Deterministic**: same inputs, same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] is a JSON object stored under `(collection, id)` with
//! `createdAt`, `updatedAt` and a [`SyncStatus`]. Local writes leave a
//! document `pending` until the remote store confirms them.
//!
//! ### Pending operations
//!
//! A write that could not be delivered becomes a [`PendingOperation`] in a
//! FIFO queue keyed by a store-assigned [`Seq`]. Failed deliveries back off
//! per [`RetryPolicy`] and are parked as `failed` once attempts run out.
//!
//! ### Reconciliation
//!
//! [`reconcile::resolve`] merges a [`RemoteDocument`] into local state:
//! pending local edits win, otherwise the strictly newer side wins, and
//! [`Tombstone`]s keep deleted documents from coming back.
//!
//! ## Quick Start
//!
//! ```rust
//! use gardensync_engine::{fields, Document, PendingOperation, QueueStatus, Store};
//! use serde_json::json;
//!
//! let mut store = Store::new();
//!
//! // local write, queued for the remote store
//! let doc = Document::new("p1", "plots", fields(json!({"name": "Bed A"})));
//! let doc = store.add(doc, 1_706_745_600_000).unwrap();
//! let op = store.enqueue(PendingOperation::add(doc, 1_706_745_600_000));
//!
//! assert_eq!(op.seq, 1);
//! assert_eq!(store.operations_with_status(QueueStatus::Pending).len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with [`StoreSnapshot`]
//! for persistence. Snapshots are serializable to JSON with deterministic ordering.

pub mod clock;
pub mod document;
pub mod error;
pub mod operation;
pub mod recurrence;
pub mod reconcile;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod task;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{fields, Document, Fields, RemoteDocument, SyncStatus};
pub use error::Error;
pub use operation::{OperationKind, PendingOperation, QueueStatus, RetryOutcome, RetryPolicy, Seq};
pub use recurrence::{RecurrencePattern, RecurrenceUnit};
pub use reconcile::{merge_documents, Resolution, Tombstone};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema, Validator};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Store, UserSettings};
pub use task::{
    next_occurrence, Category, Priority, Task, TaskRules, TaskTemplate, TimingType, TASKS,
};

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionName = String;
pub type UserId = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
