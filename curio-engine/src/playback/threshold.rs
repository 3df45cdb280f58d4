//! Playback threshold evaluator
//!
//! Consumes position/duration samples for a listening session and
//! decides, at most once per session, whether the play counts toward
//! the track's play count:
//!
//! - natural finish (position within 500 ms of duration) always counts;
//! - an early stop or track change counts when listened wall-clock time
//!   reached min(4 minutes, 50% of the track duration).
//!
//! Samples carry caller-supplied timestamps, matching how the movement
//! log accepts externally recorded times; listened time accumulates
//! only across intervals where playback was running.

use crate::track::TrackCache;
use chrono::{DateTime, Utc};
use curio_common::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// A finish this close to the track end counts as playing it through
pub const NATURAL_FINISH_TOLERANCE_MS: u64 = 500;

/// Longest listen time ever required, regardless of track length
pub const MAX_REQUIRED_LISTEN_MS: u64 = 240_000;

/// One playback position sample
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSample {
    pub position_ms: u64,
    pub is_playing: bool,
    pub at: DateTime<Utc>,
}

/// Listened time required before an early stop still counts.
/// An unknown duration gets the full four-minute requirement.
pub fn required_listen_ms(duration_ms: u64) -> u64 {
    if duration_ms == 0 {
        return MAX_REQUIRED_LISTEN_MS;
    }
    MAX_REQUIRED_LISTEN_MS.min(duration_ms / 2)
}

/// Whether `position_ms` is a natural finish for `duration_ms`
pub fn is_natural_finish(position_ms: u64, duration_ms: u64) -> bool {
    duration_ms > 0 && position_ms + NATURAL_FINISH_TOLERANCE_MS >= duration_ms
}

/// Accumulated state for one listening session
///
/// A session begins when a track starts and ends on stop or track
/// change; restarting the same track later is a new session.
#[derive(Debug, Clone)]
pub struct ListeningSession {
    track_id: String,
    duration_ms: u64,
    origin_stage: Option<Uuid>,
    started_at: DateTime<Utc>,
    listened_ms: u64,
    last_at: DateTime<Utc>,
    last_playing: bool,
}

impl ListeningSession {
    fn session_key(&self) -> String {
        format!("{}:{}", self.track_id, self.started_at.timestamp_millis())
    }

    /// Fold a sample into the listened-time accumulator
    fn absorb(&mut self, at: DateTime<Utc>, is_playing: bool) {
        if self.last_playing {
            let elapsed = (at - self.last_at).num_milliseconds().max(0) as u64;
            self.listened_ms += elapsed;
        }
        self.last_at = at;
        self.last_playing = is_playing;
    }

    pub fn listened_ms(&self) -> u64 {
        self.listened_ms
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }
}

/// Decides countable plays and feeds them into the track cache
pub struct ThresholdEvaluator {
    tracks: Arc<TrackCache>,
    /// Session keys already counted; re-entrant callbacks for the same
    /// session must not double count
    counted: Mutex<HashSet<String>>,
}

impl ThresholdEvaluator {
    pub fn new(tracks: Arc<TrackCache>) -> Self {
        ThresholdEvaluator {
            tracks,
            counted: Mutex::new(HashSet::new()),
        }
    }

    /// Start a session for a track, optionally tagged with the stage
    /// playback was initiated from
    pub fn begin_session(
        &self,
        track_id: impl Into<String>,
        duration_ms: u64,
        origin_stage: Option<Uuid>,
        started_at: DateTime<Utc>,
    ) -> ListeningSession {
        ListeningSession {
            track_id: track_id.into(),
            duration_ms,
            origin_stage,
            started_at,
            listened_ms: 0,
            last_at: started_at,
            last_playing: true,
        }
    }

    /// Feed a position sample. Returns true when this sample made the
    /// session count (natural finish).
    pub async fn observe(&self, session: &mut ListeningSession, sample: PlaybackSample) -> Result<bool> {
        session.absorb(sample.at, sample.is_playing);

        if is_natural_finish(sample.position_ms, session.duration_ms) {
            return self.count(session, sample.at).await;
        }
        Ok(false)
    }

    /// Close the session on stop or track change. Returns true when the
    /// session counted as a play.
    pub async fn finish(
        &self,
        session: &mut ListeningSession,
        final_position_ms: u64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        session.absorb(at, false);

        if is_natural_finish(final_position_ms, session.duration_ms) {
            return self.count(session, at).await;
        }

        let required = required_listen_ms(session.duration_ms);
        if session.listened_ms >= required {
            return self.count(session, at).await;
        }

        debug!(
            track_id = %session.track_id,
            listened_ms = session.listened_ms,
            required_ms = required,
            "session below play threshold"
        );
        Ok(false)
    }

    /// Forget counted sessions (identity switch)
    pub fn reset(&self) {
        self.counted.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    async fn count(&self, session: &ListeningSession, at: DateTime<Utc>) -> Result<bool> {
        {
            let mut counted = self.counted.lock().unwrap_or_else(|p| p.into_inner());
            if !counted.insert(session.session_key()) {
                return Ok(false);
            }
        }

        info!(
            track_id = %session.track_id,
            listened_ms = session.listened_ms,
            "play counted"
        );
        self.tracks
            .record_play(&session.track_id, session.origin_stage, at)
            .await?;
        Ok(true)
    }
}
