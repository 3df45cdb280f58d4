//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline role of a stage
///
/// - Source: entry point of a chain
/// - Transient: evaluation stage, may terminate into a sink
/// - Sink: terminal rating bucket reached via a termination pointer
/// - Terminal: end of the main chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Source,
    Transient,
    Sink,
    Terminal,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Source => "source",
            StageRole::Transient => "transient",
            StageRole::Sink => "sink",
            StageRole::Terminal => "terminal",
        }
    }

    pub fn parse(s: &str) -> Option<StageRole> {
        match s {
            "source" => Some(StageRole::Source),
            "transient" => Some(StageRole::Transient),
            "sink" => Some(StageRole::Sink),
            "terminal" => Some(StageRole::Terminal),
            _ => None,
        }
    }
}

/// A user-defined staging list an album can occupy
///
/// Immutable except for the connection pointers and the soft-delete
/// timestamp. Stages are never hard-deleted so movement history stays
/// resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: Uuid,
    pub name: String,
    pub role: StageRole,
    /// Forward pointer along the main chain
    pub next_stage_id: Option<Uuid>,
    /// For transient stages: the sink this stage terminates into
    pub termination_id: Option<Uuid>,
    /// Connected component this stage belongs to (cached label)
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// How an album entered a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Known,
    New,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Known => "known",
            EntryKind::New => "new",
        }
    }

    pub fn parse(s: &str) -> Option<EntryKind> {
        match s {
            "known" => Some(EntryKind::Known),
            "new" => Some(EntryKind::New),
            _ => None,
        }
    }
}

/// One stage occupancy in an album's movement history
///
/// Append-only per (album, user). At most one entry has
/// `removed_at = None` at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementEntry {
    pub stage_id: Uuid,
    pub category: String,
    pub kind: EntryKind,
    pub priority: i64,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl MovementEntry {
    /// The entry currently holding the album (not yet closed)
    pub fn is_open(&self) -> bool {
        self.removed_at.is_none()
    }
}

/// Per-(album, user) movement record header
///
/// The entries themselves live in the movement_entries table; "current
/// stage" is the entry with `removed_at = NULL`, or none if archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumUserRecord {
    pub album_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Synchronization state of a track cache entry
///
/// Clean: local value confirmed durably written to the remote service.
/// Syncing: a remote write is in flight.
/// Dirty: local value diverged and the last write attempt failed.
///
/// A full remote resync may only overwrite Clean entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Clean,
    Dirty,
    Syncing,
}

/// Locally cached per-track facts
///
/// Local source of truth for reads; the authoritative remote value is
/// reconciled asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackCacheEntry {
    pub track_id: String,
    pub name: String,
    pub artist: String,
    pub loved: bool,
    pub playcount: u32,
    pub sync_state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Stage context playback was last initiated from, if known
    pub last_played_from_stage: Option<Uuid>,
}

impl TrackCacheEntry {
    /// True while the local value has not round-tripped to the remote
    pub fn is_dirty(&self) -> bool {
        self.sync_state != SyncState::Clean
    }
}

/// Remote write operation pending retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOperation {
    SetLoved {
        loved: bool,
    },
    SetPlaycount {
        playcount: u32,
        /// Original play timestamp, preserved across retries
        played_at: DateTime<Utc>,
    },
}

impl SyncOperation {
    /// Idempotency-key component: one pending item per (track, kind)
    pub fn kind(&self) -> &'static str {
        match self {
            SyncOperation::SetLoved { .. } => "set_loved",
            SyncOperation::SetPlaycount { .. } => "set_playcount",
        }
    }
}

/// Durable record of a failed remote write, consumed by the retry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: i64,
    pub user_id: String,
    pub track_id: String,
    pub operation: SyncOperation,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}
