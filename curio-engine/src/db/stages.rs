//! Stage database queries
//!
//! Stages are soft-deleted only: history entries keep pointing at them
//! after removal, and the resolver excludes them from traversal.

use chrono::{DateTime, Utc};
use curio_common::db::models::{StageRecord, StageRole};
use curio_common::{Error, Result};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

fn stage_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StageRecord> {
    let parse_uuid = |col: &str| -> Result<Uuid> {
        let raw: String = row.get(col);
        Uuid::parse_str(&raw).map_err(|e| Error::Parse(format!("{col}: {e}")))
    };
    let parse_opt_uuid = |col: &str| -> Result<Option<Uuid>> {
        let raw: Option<String> = row.get(col);
        raw.map(|s| Uuid::parse_str(&s).map_err(|e| Error::Parse(format!("{col}: {e}"))))
            .transpose()
    };

    let role_raw: String = row.get("role");
    let role = StageRole::parse(&role_raw)
        .ok_or_else(|| Error::Parse(format!("unknown stage role '{role_raw}'")))?;

    Ok(StageRecord {
        id: parse_uuid("id")?,
        name: row.get("name"),
        role,
        next_stage_id: parse_opt_uuid("next_stage_id")?,
        termination_id: parse_opt_uuid("termination_id")?,
        group_id: parse_uuid("group_id")?,
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    })
}

/// Insert a new stage
pub async fn create_stage(db: &Pool<Sqlite>, stage: &StageRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stages (id, name, role, next_stage_id, termination_id, group_id, created_at, deleted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(stage.id.to_string())
    .bind(&stage.name)
    .bind(stage.role.as_str())
    .bind(stage.next_stage_id.map(|u| u.to_string()))
    .bind(stage.termination_id.map(|u| u.to_string()))
    .bind(stage.group_id.to_string())
    .bind(stage.created_at)
    .bind(stage.deleted_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Get a stage by id (including soft-deleted ones, for history display)
pub async fn get_stage(db: &Pool<Sqlite>, stage_id: Uuid) -> Result<StageRecord> {
    let row = sqlx::query("SELECT * FROM stages WHERE id = ?")
        .bind(stage_id.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("stage {stage_id}")))?;

    stage_from_row(&row)
}

/// All stages, created_at ascending. Soft-deleted stages are included;
/// the resolver filters them.
pub async fn list_stages(db: &Pool<Sqlite>) -> Result<Vec<StageRecord>> {
    let rows = sqlx::query("SELECT * FROM stages ORDER BY created_at ASC, id ASC")
        .fetch_all(db)
        .await?;

    rows.iter().map(stage_from_row).collect()
}

/// Rewire a stage's connection pointers (partial update: only the
/// pointers change, everything else is immutable)
pub async fn update_stage_connections(
    db: &Pool<Sqlite>,
    stage_id: Uuid,
    next_stage_id: Option<Uuid>,
    termination_id: Option<Uuid>,
) -> Result<()> {
    let result = sqlx::query("UPDATE stages SET next_stage_id = ?, termination_id = ? WHERE id = ?")
        .bind(next_stage_id.map(|u| u.to_string()))
        .bind(termination_id.map(|u| u.to_string()))
        .bind(stage_id.to_string())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("stage {stage_id}")));
    }
    Ok(())
}

/// Soft-delete a stage
pub async fn soft_delete_stage(
    db: &Pool<Sqlite>,
    stage_id: Uuid,
    deleted_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query("UPDATE stages SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(deleted_at)
        .bind(stage_id.to_string())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("stage {stage_id} (or already deleted)")));
    }
    Ok(())
}
