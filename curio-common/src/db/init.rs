//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up
//! idempotently. The track cache itself is memory-resident; only
//! stages, movement history and the sync queue are durable.

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while the sync sweep writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables (idempotent - safe to call multiple times)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // Pipeline stages. Soft-deleted via deleted_at; never hard-deleted
    // so movement history stays resolvable.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stages (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            next_stage_id TEXT,
            termination_id TEXT,
            group_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-(album, user) movement record header
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS album_user_records (
            album_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (album_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only stage occupancy history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS movement_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            album_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            category TEXT NOT NULL,
            kind TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            added_at TEXT NOT NULL,
            removed_at TEXT,
            FOREIGN KEY (album_id, user_id)
                REFERENCES album_user_records(album_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_movement_entries_open
         ON movement_entries(album_id, user_id, removed_at)",
    )
    .execute(pool)
    .await?;

    // Failed remote writes pending retry. One pending item per
    // (user, track, operation kind): a newer write supersedes the old.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            op_kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            enqueued_at TEXT NOT NULL,
            UNIQUE (user_id, track_id, op_kind) ON CONFLICT REPLACE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
