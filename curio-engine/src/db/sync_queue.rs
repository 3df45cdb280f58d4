//! Sync queue database queries
//!
//! The queue is the only durable concurrency-relevant state: a failed
//! remote write survives restarts until a sweep delivers it. One
//! pending item per (user, track, operation kind) - re-enqueueing the
//! same operation replaces the stale payload instead of duplicating it.

use chrono::{DateTime, Utc};
use curio_common::db::models::{SyncOperation, SyncQueueItem};
use curio_common::{Error, Result};
use sqlx::{Pool, Row, Sqlite};

/// Enqueue a failed remote write for retry (upsert on the idempotency
/// key: a newer write for the same track and operation supersedes)
pub async fn enqueue(
    db: &Pool<Sqlite>,
    user_id: &str,
    track_id: &str,
    operation: &SyncOperation,
    last_error: &str,
    enqueued_at: DateTime<Utc>,
) -> Result<()> {
    let payload = serde_json::to_string(operation)
        .map_err(|e| Error::Parse(format!("sync payload: {e}")))?;

    sqlx::query(
        "INSERT INTO sync_queue (user_id, track_id, op_kind, payload, attempts, last_error, enqueued_at)
         VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(user_id)
    .bind(track_id)
    .bind(operation.kind())
    .bind(payload)
    .bind(last_error)
    .bind(enqueued_at)
    .execute(db)
    .await?;

    Ok(())
}

/// All pending items for a user, oldest first
pub async fn list_pending(db: &Pool<Sqlite>, user_id: &str) -> Result<Vec<SyncQueueItem>> {
    let rows = sqlx::query(
        "SELECT id, user_id, track_id, payload, attempts, last_error, enqueued_at
         FROM sync_queue WHERE user_id = ? ORDER BY enqueued_at ASC, id ASC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    rows.iter()
        .map(|row| {
            let payload: String = row.get("payload");
            let operation: SyncOperation = serde_json::from_str(&payload)
                .map_err(|e| Error::Parse(format!("sync payload: {e}")))?;
            Ok(SyncQueueItem {
                id: row.get("id"),
                user_id: row.get("user_id"),
                track_id: row.get("track_id"),
                operation,
                attempts: row.get("attempts"),
                last_error: row.get("last_error"),
                enqueued_at: row.get("enqueued_at"),
            })
        })
        .collect()
}

/// Remove an item after its remote call succeeded
pub async fn remove(db: &Pool<Sqlite>, item_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(item_id)
        .execute(db)
        .await?;

    Ok(())
}

/// Record another failed attempt
pub async fn record_failure(db: &Pool<Sqlite>, item_id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE sync_queue SET attempts = attempts + 1, last_error = ? WHERE id = ?")
        .bind(error)
        .bind(item_id)
        .execute(db)
        .await?;

    Ok(())
}

/// Pending item count for a user
pub async fn pending_count(db: &Pool<Sqlite>, user_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(db)
        .await?;

    Ok(count)
}
