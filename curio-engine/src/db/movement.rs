//! Movement log database queries
//!
//! The movement history is append-only: entries are closed by setting
//! `removed_at`, never rewritten. Writes touch only the columns that
//! change so concurrent readers see a consistent record.

use chrono::{DateTime, Utc};
use curio_common::db::models::{AlbumUserRecord, EntryKind, MovementEntry};
use curio_common::{Error, Result};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MovementEntry> {
    let stage_raw: String = row.get("stage_id");
    let kind_raw: String = row.get("kind");

    Ok(MovementEntry {
        stage_id: Uuid::parse_str(&stage_raw).map_err(|e| Error::Parse(format!("stage_id: {e}")))?,
        category: row.get("category"),
        kind: EntryKind::parse(&kind_raw)
            .ok_or_else(|| Error::Parse(format!("unknown entry kind '{kind_raw}'")))?,
        priority: row.get("priority"),
        added_at: row.get("added_at"),
        removed_at: row.get("removed_at"),
    })
}

/// Fetch the per-(album, user) record header
pub async fn get_album_user_record(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
) -> Result<Option<AlbumUserRecord>> {
    let row = sqlx::query(
        "SELECT album_id, user_id, created_at, updated_at
         FROM album_user_records WHERE album_id = ? AND user_id = ?",
    )
    .bind(album_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(|row| AlbumUserRecord {
        album_id: row.get("album_id"),
        user_id: row.get("user_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// Create the record header for an album's first insertion
pub async fn create_album_user_record(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO album_user_records (album_id, user_id, created_at, updated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(album_id)
    .bind(user_id)
    .bind(created_at)
    .bind(created_at)
    .execute(db)
    .await?;

    Ok(())
}

/// All open entries for (album, user). The invariant allows at most
/// one; callers check and surface violations.
pub async fn get_open_entries(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
) -> Result<Vec<MovementEntry>> {
    let rows = sqlx::query(
        "SELECT stage_id, category, kind, priority, added_at, removed_at
         FROM movement_entries
         WHERE album_id = ? AND user_id = ? AND removed_at IS NULL
         ORDER BY added_at ASC",
    )
    .bind(album_id)
    .bind(user_id)
    .fetch_all(db)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Full history for (album, user) in insertion order
pub async fn get_history(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
) -> Result<Vec<MovementEntry>> {
    let rows = sqlx::query(
        "SELECT stage_id, category, kind, priority, added_at, removed_at
         FROM movement_entries
         WHERE album_id = ? AND user_id = ?
         ORDER BY added_at ASC, id ASC",
    )
    .bind(album_id)
    .bind(user_id)
    .fetch_all(db)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Close every open entry for (album, user) at `occurred_at`.
/// Returns the number of entries closed.
pub async fn close_open_entries(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
    occurred_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE movement_entries SET removed_at = ?
         WHERE album_id = ? AND user_id = ? AND removed_at IS NULL",
    )
    .bind(occurred_at)
    .bind(album_id)
    .bind(user_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

/// Append a new open entry
pub async fn append_entry(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
    entry: &MovementEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO movement_entries
         (album_id, user_id, stage_id, category, kind, priority, added_at, removed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(album_id)
    .bind(user_id)
    .bind(entry.stage_id.to_string())
    .bind(&entry.category)
    .bind(entry.kind.as_str())
    .bind(entry.priority)
    .bind(entry.added_at)
    .bind(entry.removed_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Bump the record header's updated_at
pub async fn touch_album_user_record(
    db: &Pool<Sqlite>,
    album_id: &str,
    user_id: &str,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE album_user_records SET updated_at = ? WHERE album_id = ? AND user_id = ?",
    )
    .bind(updated_at)
    .bind(album_id)
    .bind(user_id)
    .execute(db)
    .await?;

    Ok(())
}
