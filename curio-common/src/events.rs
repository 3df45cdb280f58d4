//! Event types for the Curio event system
//!
//! Emitted over a `tokio::sync::broadcast` channel so a presentation
//! layer can subscribe without polling the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Curio event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CurioEvent {
    /// An album advanced to a new pipeline stage
    AlbumMoved {
        album_id: String,
        user_id: String,
        from_stage: Option<Uuid>,
        to_stage: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track's loved flag changed locally (optimistic write)
    TrackLoveChanged {
        track_id: String,
        loved: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A listening session crossed the play threshold
    PlayRecorded {
        track_id: String,
        playcount: u32,
        stage_id: Option<Uuid>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A sync queue sweep finished
    SyncSweepCompleted {
        retried: usize,
        succeeded: usize,
        failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Connection health probe result changed
    ConnectionStatusChanged {
        reachable: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The signed-in identity changed; caches were invalidated
    IdentityChanged {
        user_id: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}
