//! SQLite-backed local store.

use super::{DocumentEdit, InFlightCheck, LocalStore};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use gardensync_engine::{
    reconcile, Clock, Document, Error as EngineError, Fields, OperationKind, PendingOperation,
    QueueStatus, RemoteDocument, Resolution, Seq, SyncStatus, SystemClock, Timestamp, Tombstone,
    UserSettings,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

/// Local store persisted in SQLite.
///
/// The pool holds a single connection that never expires, so every call's
/// transaction runs alone and `sqlite::memory:` databases stay alive for the
/// lifetime of the store.
#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    pool: Pool,
    clock: Arc<dyn Clock>,
}

impl SqliteLocalStore {
    /// Open (creating if needed) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_clock(database_url, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        tracing::debug!(url = %database_url, "local database ready");

        Ok(Self { pool, clock })
    }

    /// Number of documents in the given sync state, across collections.
    pub async fn count_documents(&self, status: SyncStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE sync_status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn to_db(ts: Timestamp) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> Timestamp {
    u64::try_from(value).unwrap_or(0)
}

/// A stored document row from the database.
#[derive(Debug)]
struct StoredDocument {
    collection: String,
    id: String,
    fields: Json<Fields>,
    created_at: i64,
    updated_at: i64,
    sync_status: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredDocument {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            id: row.try_get("id")?,
            fields: row.try_get("fields")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            sync_status: row.try_get("sync_status")?,
        })
    }
}

impl StoredDocument {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            sync_status: self.sync_status.parse()?,
            id: self.id,
            collection: self.collection,
            fields: self.fields.0,
            created_at: from_db(self.created_at),
            updated_at: from_db(self.updated_at),
        })
    }
}

/// A stored queue row from the database.
#[derive(Debug)]
struct StoredOperation {
    seq: i64,
    collection: String,
    document_id: String,
    kind: String,
    payload: Option<Json<Document>>,
    enqueued_at: i64,
    attempt_count: i64,
    status: String,
    last_error: Option<String>,
    next_retry_at: Option<i64>,
    completed_at: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOperation {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            seq: row.try_get("seq")?,
            collection: row.try_get("collection")?,
            document_id: row.try_get("document_id")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get("enqueued_at")?,
            attempt_count: row.try_get("attempt_count")?,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            next_retry_at: row.try_get("next_retry_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl StoredOperation {
    fn into_operation(self) -> Result<PendingOperation> {
        let seq = Seq::try_from(self.seq)
            .map_err(|_| StorageError::Corrupt(format!("negative seq {}", self.seq)))?;
        let attempt_count = u32::try_from(self.attempt_count).map_err(|_| {
            StorageError::Corrupt(format!("attempt count {} on seq {}", self.attempt_count, seq))
        })?;

        Ok(PendingOperation {
            seq,
            collection: self.collection,
            document_id: self.document_id,
            kind: self.kind.parse()?,
            payload: self.payload.map(|p| p.0),
            enqueued_at: from_db(self.enqueued_at),
            attempt_count,
            status: self.status.parse()?,
            last_error: self.last_error,
            next_retry_at: self.next_retry_at.map(from_db),
            completed_at: self.completed_at.map(from_db),
        })
    }
}

const SELECT_OPERATION: &str = "SELECT seq, collection, document_id, kind, payload, enqueued_at, \
     attempt_count, status, last_error, next_retry_at, completed_at FROM sync_queue";

async fn fetch_document(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> Result<Option<Document>> {
    sqlx::query_as::<_, StoredDocument>(
        "SELECT collection, id, fields, created_at, updated_at, sync_status \
         FROM documents WHERE collection = ? AND id = ?",
    )
    .bind(collection)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .map(StoredDocument::into_document)
    .transpose()
}

async fn upsert_document(conn: &mut SqliteConnection, document: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (collection, id, fields, created_at, updated_at, sync_status)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (collection, id) DO UPDATE SET
            fields = excluded.fields,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            sync_status = excluded.sync_status
        "#,
    )
    .bind(&document.collection)
    .bind(&document.id)
    .bind(Json(&document.fields))
    .bind(to_db(document.created_at))
    .bind(to_db(document.updated_at))
    .bind(document.sync_status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_operation(conn: &mut SqliteConnection, seq: Seq) -> Result<Option<PendingOperation>> {
    sqlx::query_as::<_, StoredOperation>(&format!("{SELECT_OPERATION} WHERE seq = ?"))
        .bind(to_db(seq))
        .fetch_optional(conn)
        .await?
        .map(StoredOperation::into_operation)
        .transpose()
}

async fn update_operation(conn: &mut SqliteConnection, op: &PendingOperation) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sync_queue SET
            payload = ?, attempt_count = ?, status = ?, last_error = ?,
            next_retry_at = ?, completed_at = ?
        WHERE seq = ?
        "#,
    )
    .bind(op.payload.as_ref().map(Json))
    .bind(i64::from(op.attempt_count))
    .bind(op.status.as_str())
    .bind(&op.last_error)
    .bind(op.next_retry_at.map(to_db))
    .bind(op.completed_at.map(to_db))
    .bind(to_db(op.seq))
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        sqlx::query_as::<_, StoredDocument>(
            "SELECT collection, id, fields, created_at, updated_at, sync_status \
             FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredDocument::into_document)
        .collect()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let mut conn = self.pool.acquire().await?;
        fetch_document(&mut conn, collection, id).await
    }

    async fn add(&self, mut document: Document) -> Result<Document> {
        let now = self.clock.now();
        if document.created_at == 0 {
            document.created_at = now;
        }
        if document.updated_at == 0 {
            document.updated_at = now;
        }

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO documents (collection, id, fields, created_at, updated_at, sync_status) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.collection)
        .bind(&document.id)
        .bind(Json(&document.fields))
        .bind(to_db(document.created_at))
        .bind(to_db(document.updated_at))
        .bind(document.sync_status.as_str())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::DuplicateKey {
                    collection: document.collection,
                    id: document.id,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query("DELETE FROM tombstones WHERE collection = ? AND id = ?")
            .bind(&document.collection)
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(document)
    }

    async fn update(&self, mut document: Document) -> Result<Document> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let previous = fetch_document(&mut tx, &document.collection, &document.id)
            .await?
            .ok_or_else(|| EngineError::not_found(&document.collection, &document.id))?;

        document.updated_at = now.max(previous.updated_at.saturating_add(1));
        if document.created_at == 0 {
            document.created_at = previous.created_at;
        }

        upsert_document(&mut tx, &document).await?;
        tx.commit().await?;
        Ok(document)
    }

    async fn modify(&self, collection: &str, id: &str, edit: DocumentEdit<'_>) -> Result<Document> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let mut document = fetch_document(&mut tx, collection, id)
            .await?
            .ok_or_else(|| EngineError::not_found(collection, id))?;
        let previous = document.updated_at;

        edit(&mut document)?;
        document.collection = collection.to_string();
        document.id = id.to_string();
        document.updated_at = now.max(previous.saturating_add(1));

        upsert_document(&mut tx, &document).await?;
        tx.commit().await?;
        Ok(document)
    }

    async fn put(&self, document: Document) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_document(&mut conn, &document).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO tombstones (collection, id, deleted_at) VALUES (?, ?, ?)
            ON CONFLICT (collection, id) DO UPDATE SET
                deleted_at = MAX(deleted_at, excluded.deleted_at)
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(to_db(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply_remote(
        &self,
        collection: &str,
        remote: &RemoteDocument,
    ) -> Result<Option<Document>> {
        let mut tx = self.pool.begin().await?;

        let local = fetch_document(&mut tx, collection, &remote.id).await?;

        let tombstone = sqlx::query_as::<_, (i64,)>(
            "SELECT deleted_at FROM tombstones WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(&remote.id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(deleted_at,)| Tombstone::new(collection, &remote.id, from_db(deleted_at)));

        let (delete_outstanding,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM sync_queue WHERE collection = ? AND document_id = ? \
             AND kind = ? AND status != ?)",
        )
        .bind(collection)
        .bind(&remote.id)
        .bind(OperationKind::Delete.as_str())
        .bind(QueueStatus::Completed.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let resolution = reconcile::resolve(
            collection,
            local.as_ref(),
            tombstone.as_ref(),
            delete_outstanding,
            remote,
        );

        let result = match resolution {
            Resolution::KeepLocal => local,
            Resolution::Suppressed => None,
            Resolution::AdoptRemote(document) => {
                upsert_document(&mut tx, &document).await?;
                sqlx::query("DELETE FROM tombstones WHERE collection = ? AND id = ?")
                    .bind(collection)
                    .bind(&remote.id)
                    .execute(&mut *tx)
                    .await?;
                Some(document)
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn mark_synced(
        &self,
        collection: &str,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_at: Timestamp,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET sync_status = ?, updated_at = ? \
             WHERE collection = ? AND id = ? AND updated_at = ?",
        )
        .bind(SyncStatus::Synced.as_str())
        .bind(to_db(confirmed_at))
        .bind(collection)
        .bind(id)
        .bind(to_db(expected_updated_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn enqueue(&self, mut op: PendingOperation) -> Result<PendingOperation> {
        op.status = QueueStatus::Pending;
        op.attempt_count = 0;
        op.next_retry_at = None;
        op.completed_at = None;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (
                collection, document_id, kind, payload, enqueued_at,
                attempt_count, status, last_error, next_retry_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, NULL, NULL)
            "#,
        )
        .bind(&op.collection)
        .bind(&op.document_id)
        .bind(op.kind.as_str())
        .bind(op.payload.as_ref().map(Json))
        .bind(to_db(op.enqueued_at))
        .bind(op.status.as_str())
        .bind(&op.last_error)
        .execute(&self.pool)
        .await?;

        op.seq = from_db(result.last_insert_rowid());
        tracing::debug!(
            seq = op.seq,
            collection = %op.collection,
            id = %op.document_id,
            kind = %op.kind,
            "enqueued"
        );
        Ok(op)
    }

    async fn operations_with_status(&self, status: QueueStatus) -> Result<Vec<PendingOperation>> {
        sqlx::query_as::<_, StoredOperation>(&format!(
            "{SELECT_OPERATION} WHERE status = ? ORDER BY seq"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredOperation::into_operation)
        .collect()
    }

    async fn operations_for(&self, collection: &str, id: &str) -> Result<Vec<PendingOperation>> {
        sqlx::query_as::<_, StoredOperation>(&format!(
            "{SELECT_OPERATION} WHERE collection = ? AND document_id = ? ORDER BY seq"
        ))
        .bind(collection)
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StoredOperation::into_operation)
        .collect()
    }

    async fn claim_operation(&self, seq: Seq) -> Result<Option<PendingOperation>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query("UPDATE sync_queue SET status = ? WHERE seq = ? AND status = ?")
            .bind(QueueStatus::InProgress.as_str())
            .bind(to_db(seq))
            .bind(QueueStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let op = if claimed == 1 {
            fetch_operation(&mut tx, seq).await?
        } else {
            None
        };

        tx.commit().await?;
        Ok(op)
    }

    async fn save_operation(&self, op: &PendingOperation) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        match update_operation(&mut conn, op).await? {
            0 => Err(EngineError::OperationNotFound(op.seq).into()),
            _ => Ok(()),
        }
    }

    async fn has_outstanding(&self, collection: &str, id: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM sync_queue WHERE collection = ? AND document_id = ? \
             AND status != ?)",
        )
        .bind(collection)
        .bind(id)
        .bind(QueueStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn requeue_in_progress(&self, in_flight: InFlightCheck<'_>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let stranded: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT seq, collection, document_id FROM sync_queue WHERE status = ? ORDER BY seq",
        )
        .bind(QueueStatus::InProgress.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut moved = 0;
        for (seq, collection, document_id) in stranded {
            if in_flight(&collection, &document_id) {
                continue;
            }
            sqlx::query("UPDATE sync_queue SET status = ? WHERE seq = ?")
                .bind(QueueStatus::Pending.as_str())
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            moved += 1;
        }

        tx.commit().await?;
        Ok(moved)
    }

    async fn requeue_failed(&self, seq: Seq) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let mut op = fetch_operation(&mut tx, seq)
            .await?
            .ok_or(EngineError::OperationNotFound(seq))?;

        if !op.requeue() {
            return Ok(false);
        }
        update_operation(&mut tx, &op).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn purge_completed(&self, older_than: Timestamp) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM sync_queue WHERE status = ? AND completed_at < ?")
                .bind(QueueStatus::Completed.as_str())
                .bind(to_db(older_than))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn purge_tombstones(&self, older_than: Timestamp) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM tombstones
            WHERE deleted_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue q
                  WHERE q.collection = tombstones.collection
                    AND q.document_id = tombstones.id
                    AND q.status != ?
              )
            "#,
        )
        .bind(to_db(older_than))
        .bind(QueueStatus::Completed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn load_settings(&self, user_id: &str) -> Result<Option<UserSettings>> {
        let row = sqlx::query("SELECT user_id, last_sync_at FROM user_settings WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<UserSettings> {
            Ok(UserSettings {
                user_id: row.try_get("user_id")?,
                last_sync_at: row.try_get::<Option<i64>, _>("last_sync_at")?.map(from_db),
            })
        })
        .transpose()
    }

    async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, last_sync_at) VALUES (?, ?)
            ON CONFLICT (user_id) DO UPDATE SET last_sync_at = excluded.last_sync_at
            "#,
        )
        .bind(&settings.user_id)
        .bind(settings.last_sync_at.map(to_db))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
