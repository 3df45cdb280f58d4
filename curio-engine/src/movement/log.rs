//! Movement log
//!
//! Per-album, per-user append-only history of stage occupancy; the unit
//! of truth for "where is this album now". Moving an album closes the
//! open history entry and opens a new one - entries are never rewritten.
//!
//! Callers must not issue overlapping `advance` calls for the same
//! (album, user); the single-open-entry invariant is checked on every
//! write and a violation is surfaced, never silently repaired.

use crate::db;
use chrono::{DateTime, Utc};
use curio_common::db::models::{EntryKind, MovementEntry, StageRecord};
use curio_common::{CurioEvent, Error, Result};
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Where and how an album lands in a stage
#[derive(Debug, Clone)]
pub struct StagePlacement {
    pub stage_id: Uuid,
    pub category: String,
    pub kind: EntryKind,
    pub priority: i64,
}

/// Append-only album movement history
pub struct MovementLog {
    db: Pool<Sqlite>,
    event_tx: broadcast::Sender<CurioEvent>,
}

impl MovementLog {
    pub fn new(db: Pool<Sqlite>, event_tx: broadcast::Sender<CurioEvent>) -> Self {
        MovementLog { db, event_tx }
    }

    /// Create the movement record for an album's first appearance.
    /// Idempotent: an existing record is left untouched.
    pub async fn register_album(
        &self,
        album_id: &str,
        user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        if db::movement::get_album_user_record(&self.db, album_id, user_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        db::movement::create_album_user_record(&self.db, album_id, user_id, created_at).await?;
        info!(album_id, user_id, "registered album movement record");
        Ok(())
    }

    /// Move an album into `placement.stage_id` at `occurred_at`.
    ///
    /// `occurred_at` may be an externally recorded timestamp (e.g. from
    /// the streaming provider) so chronology survives a delayed local
    /// write; `added_at` is not the wall-clock write time.
    pub async fn advance(
        &self,
        album_id: &str,
        user_id: &str,
        placement: StagePlacement,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        db::movement::get_album_user_record(&self.db, album_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("album record {album_id}/{user_id}")))?;

        let target = db::stages::get_stage(&self.db, placement.stage_id).await?;
        if target.deleted_at.is_some() {
            return Err(Error::InvalidState(format!(
                "target stage {} is deleted",
                placement.stage_id
            )));
        }

        let open = db::movement::get_open_entries(&self.db, album_id, user_id).await?;
        if open.len() > 1 {
            warn!(
                album_id,
                user_id,
                open = open.len(),
                "movement history has multiple open entries"
            );
            return Err(Error::DataIntegrity(format!(
                "{} open movement entries for {album_id}/{user_id}, expected at most 1",
                open.len()
            )));
        }
        let from_stage = open.first().map(|entry| entry.stage_id);

        let closed = db::movement::close_open_entries(&self.db, album_id, user_id, occurred_at).await?;
        db::movement::append_entry(
            &self.db,
            album_id,
            user_id,
            &MovementEntry {
                stage_id: placement.stage_id,
                category: placement.category,
                kind: placement.kind,
                priority: placement.priority,
                added_at: occurred_at,
                removed_at: None,
            },
        )
        .await?;
        db::movement::touch_album_user_record(&self.db, album_id, user_id, Utc::now()).await?;

        info!(
            album_id,
            user_id,
            from = ?from_stage,
            to = %placement.stage_id,
            closed,
            "album advanced"
        );

        let _ = self.event_tx.send(CurioEvent::AlbumMoved {
            album_id: album_id.to_string(),
            user_id: user_id.to_string(),
            from_stage,
            to_stage: placement.stage_id,
            timestamp: occurred_at,
        });

        Ok(())
    }

    /// The stage currently holding the album, or None if archived
    /// (no open entry).
    pub async fn current_stage(&self, album_id: &str, user_id: &str) -> Result<Option<StageRecord>> {
        let stage_id = self.current_stage_id(album_id, user_id).await?;
        match stage_id {
            Some(id) => Ok(Some(db::stages::get_stage(&self.db, id).await?)),
            None => Ok(None),
        }
    }

    /// Whether the album has left `original_stage_id` since the caller
    /// recorded it as a baseline.
    pub async fn has_moved(
        &self,
        album_id: &str,
        user_id: &str,
        original_stage_id: Uuid,
    ) -> Result<bool> {
        let current = self.current_stage_id(album_id, user_id).await?;
        Ok(current != Some(original_stage_id))
    }

    /// Full movement history in insertion order
    pub async fn history(&self, album_id: &str, user_id: &str) -> Result<Vec<MovementEntry>> {
        db::movement::get_album_user_record(&self.db, album_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("album record {album_id}/{user_id}")))?;

        db::movement::get_history(&self.db, album_id, user_id).await
    }

    async fn current_stage_id(&self, album_id: &str, user_id: &str) -> Result<Option<Uuid>> {
        db::movement::get_album_user_record(&self.db, album_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("album record {album_id}/{user_id}")))?;

        let open = db::movement::get_open_entries(&self.db, album_id, user_id).await?;
        if open.len() > 1 {
            return Err(Error::DataIntegrity(format!(
                "{} open movement entries for {album_id}/{user_id}, expected at most 1",
                open.len()
            )));
        }
        Ok(open.first().map(|entry| entry.stage_id))
    }
}
