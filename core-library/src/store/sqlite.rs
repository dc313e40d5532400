//! SQLite implementation of [`LocalStore`]
//!
//! Each unit is kept as its JSON document next to a few indexed columns.
//! The queue is ordered by an autoincrement `seq`, so FIFO order survives
//! restarts and in-place updates.

use super::{validate_unit, EntityStore, LocalStore, MutationQueue};
use crate::error::{LibraryError, Result};
use crate::models::{LocalChange, MutationRecord, SyncState, Unit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct QueueRow {
    id: String,
    entity_type: String,
    action: String,
    payload: String,
    enqueued_at: i64,
    retry_count: i64,
}

impl TryFrom<QueueRow> for MutationRecord {
    type Error = LibraryError;

    fn try_from(row: QueueRow) -> Result<Self> {
        let enqueued_at =
            DateTime::<Utc>::from_timestamp_millis(row.enqueued_at).ok_or_else(|| {
                LibraryError::InvalidInput {
                    field: "enqueued_at".to_string(),
                    message: format!("timestamp {} out of range", row.enqueued_at),
                }
            })?;

        Ok(MutationRecord {
            entity_type: row.entity_type.parse()?,
            action: row.action.parse()?,
            payload: serde_json::from_str(&row.payload)
                .map_err(|e| LibraryError::serialization("queue payload", e))?,
            enqueued_at,
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
            id: row.id,
        })
    }
}

fn decode_unit(document: &str) -> Result<Unit> {
    serde_json::from_str(document).map_err(|e| LibraryError::serialization("unit document", e))
}

async fn write_unit(conn: &mut SqliteConnection, unit: &Unit) -> Result<()> {
    validate_unit(unit)?;
    let document =
        serde_json::to_string(unit).map_err(|e| LibraryError::serialization("unit", e))?;

    query(
        r#"
        INSERT INTO units (id, owner_id, game_system, sync_state, updated_at, document)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            game_system = excluded.game_system,
            sync_state = excluded.sync_state,
            updated_at = excluded.updated_at,
            document = excluded.document
        "#,
    )
    .bind(&unit.id)
    .bind(&unit.owner_id)
    .bind(&unit.game_system)
    .bind(unit.sync_state.as_str())
    .bind(unit.updated_at.timestamp_millis())
    .bind(document)
    .execute(conn)
    .await?;

    Ok(())
}

async fn write_record(conn: &mut SqliteConnection, record: &MutationRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)
        .map_err(|e| LibraryError::serialization("queue payload", e))?;

    query(
        r#"
        INSERT INTO mutation_queue (id, entity_type, action, payload, enqueued_at, retry_count)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            payload = excluded.payload,
            retry_count = excluded.retry_count
        "#,
    )
    .bind(&record.id)
    .bind(record.entity_type.as_str())
    .bind(record.action.as_str())
    .bind(payload)
    .bind(record.enqueued_at.timestamp_millis())
    .bind(i64::from(record.retry_count))
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl EntityStore for SqliteLocalStore {
    async fn get_unit(&self, id: &str) -> Result<Option<Unit>> {
        let row: Option<(String,)> = query_as("SELECT document FROM units WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(document,)| decode_unit(&document)).transpose()
    }

    async fn list_units(&self) -> Result<Vec<Unit>> {
        let rows: Vec<(String,)> =
            query_as("SELECT document FROM units ORDER BY updated_at DESC, id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(|(document,)| decode_unit(document)).collect()
    }

    async fn upsert_unit(&self, unit: &Unit) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_unit(&mut conn, unit).await
    }

    async fn delete_unit(&self, id: &str) -> Result<bool> {
        let result = query("DELETE FROM units WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_sync_state(&self, id: &str, state: SyncState) -> Result<bool> {
        let result = query(
            r#"
            UPDATE units
            SET sync_state = ?1, document = json_set(document, '$.syncStatus', ?1)
            WHERE id = ?2
            "#,
        )
        .bind(state.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MutationQueue for SqliteLocalStore {
    async fn enqueue(&self, record: &MutationRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_record(&mut conn, record).await
    }

    async fn pending(&self) -> Result<Vec<MutationRecord>> {
        let rows = query_as::<_, QueueRow>(
            r#"
            SELECT id, entity_type, action, payload, enqueued_at, retry_count
            FROM mutation_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MutationRecord::try_from).collect()
    }

    async fn update_record(&self, record: &MutationRecord) -> Result<bool> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| LibraryError::serialization("queue payload", e))?;

        let result = query("UPDATE mutation_queue SET payload = ?, retry_count = ? WHERE id = ?")
            .bind(payload)
            .bind(i64::from(record.retry_count))
            .bind(&record.id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_record(&self, id: &str) -> Result<bool> {
        let result = query("DELETE FROM mutation_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_count(&self) -> Result<usize> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM mutation_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    #[instrument(skip(self, change, record), fields(record_id = %record.id, action = %record.action))]
    async fn record_mutation(&self, change: LocalChange, record: &MutationRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        match &change {
            LocalChange::Upsert(unit) => write_unit(&mut tx, unit).await?,
            LocalChange::Delete(id) => {
                query("DELETE FROM units WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        write_record(&mut tx, record).await?;

        tx.commit().await?;
        debug!("Local mutation committed");
        Ok(())
    }
}
