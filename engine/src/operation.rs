//! Queued mutations awaiting remote confirmation.
//!
//! A [`PendingOperation`] is created when a remote write fails or is skipped
//! while offline. It moves through the states
//!
//! ```text
//! pending -> inProgress -> completed
//!                       -> pending   (retryable failure, attemptCount + 1)
//!                       -> failed    (attemptCount >= maxRetries)
//! ```

use crate::{error::Result, CollectionName, Document, DocumentId, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned queue position. Strictly increasing in enqueue order.
pub type Seq = u64;

/// The mutation an operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(OperationKind::Add),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Queue state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    /// Terminal until manually requeued
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Pending,
        QueueStatus::InProgress,
        QueueStatus::Completed,
        QueueStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Anything but `completed` still owes the remote store a write.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, QueueStatus::Completed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "in_progress" | "inProgress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Retry schedule for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts before an operation is parked as failed
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay_ms: u64,
    /// Upper bound for the exponential delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 60_000,
            max_delay_ms: 30 * 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failures (1-based).
    pub fn backoff(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }
}

/// What a failed attempt led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back to pending, due again at the given time
    Rescheduled(Timestamp),
    /// Attempts exhausted
    Exhausted,
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Queue position, assigned on enqueue
    pub seq: Seq,
    /// Target collection
    pub collection: CollectionName,
    /// Target document
    pub document_id: DocumentId,
    /// Mutation to replay
    pub kind: OperationKind,
    /// Document snapshot for add/update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Document>,
    pub enqueued_at: Timestamp,
    pub attempt_count: u32,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl PendingOperation {
    fn new(
        kind: OperationKind,
        collection: impl Into<CollectionName>,
        document_id: impl Into<DocumentId>,
        payload: Option<Document>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            seq: 0,
            collection: collection.into(),
            document_id: document_id.into(),
            kind,
            payload,
            enqueued_at,
            attempt_count: 0,
            status: QueueStatus::Pending,
            last_error: None,
            next_retry_at: None,
            completed_at: None,
        }
    }

    /// Queue an add carrying the document snapshot.
    pub fn add(document: Document, enqueued_at: Timestamp) -> Self {
        Self::new(
            OperationKind::Add,
            document.collection.clone(),
            document.id.clone(),
            Some(document),
            enqueued_at,
        )
    }

    /// Queue an update carrying the merged document snapshot.
    pub fn update(document: Document, enqueued_at: Timestamp) -> Self {
        Self::new(
            OperationKind::Update,
            document.collection.clone(),
            document.id.clone(),
            Some(document),
            enqueued_at,
        )
    }

    /// Queue a delete.
    pub fn delete(
        collection: impl Into<CollectionName>,
        document_id: impl Into<DocumentId>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self::new(OperationKind::Delete, collection, document_id, None, enqueued_at)
    }

    /// The (collection, id) this operation targets.
    pub fn key(&self) -> (CollectionName, DocumentId) {
        (self.collection.clone(), self.document_id.clone())
    }

    pub fn targets(&self, collection: &str, id: &str) -> bool {
        self.collection == collection && self.document_id == id
    }

    /// Whether a pending operation may be attempted at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// `pending -> inProgress`. Returns false if the operation was not pending.
    pub fn begin(&mut self) -> bool {
        if self.status != QueueStatus::Pending {
            return false;
        }
        self.status = QueueStatus::InProgress;
        true
    }

    /// `inProgress -> pending` without spending an attempt.
    ///
    /// Used when a direct write fails and the queue should take over.
    pub fn release(&mut self, error: impl Into<String>) -> bool {
        if self.status != QueueStatus::InProgress {
            return false;
        }
        self.status = QueueStatus::Pending;
        self.last_error = Some(error.into());
        true
    }

    /// Record a confirmed delivery.
    pub fn complete(&mut self, now: Timestamp) {
        self.status = QueueStatus::Completed;
        self.completed_at = Some(now);
        self.next_retry_at = None;
    }

    /// Record a failed delivery and schedule the retry, or park the operation.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: Timestamp,
        policy: &RetryPolicy,
    ) -> RetryOutcome {
        self.attempt_count += 1;
        self.last_error = Some(error.into());

        if self.attempt_count >= policy.max_retries {
            self.status = QueueStatus::Failed;
            self.next_retry_at = None;
            RetryOutcome::Exhausted
        } else {
            let at = now.saturating_add(policy.backoff(self.attempt_count));
            self.status = QueueStatus::Pending;
            self.next_retry_at = Some(at);
            RetryOutcome::Rescheduled(at)
        }
    }

    /// Manual intervention: put a failed operation back in the queue.
    ///
    /// The attempt budget starts over; `last_error` is kept for diagnostics.
    pub fn requeue(&mut self) -> bool {
        if self.status != QueueStatus::Failed {
            return false;
        }
        self.status = QueueStatus::Pending;
        self.attempt_count = 0;
        self.next_retry_at = None;
        true
    }
}
