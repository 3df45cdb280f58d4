//! Engine composition root
//!
//! One `CurioSession` per signed-in identity owns the identity-scoped
//! services: movement log, track cache, threshold evaluator, token
//! manager, and connection monitor. Switching identity rebuilds the
//! caches and invalidates the memoized statuses so nothing leaks
//! between accounts.

use crate::movement::MovementLog;
use crate::pipeline::{self, OrderedStage};
use crate::playback::ThresholdEvaluator;
use crate::remote::{ConnectionMonitor, ScrobbleService, StreamingProvider, TokenManager};
use crate::track::TrackCache;
use crate::{db, Result};
use chrono::Utc;
use curio_common::CurioEvent;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Identity-scoped service container
pub struct CurioSession {
    user_id: String,
    db: Pool<Sqlite>,
    scrobbler: Arc<dyn ScrobbleService>,
    provider: Arc<dyn StreamingProvider>,
    event_tx: broadcast::Sender<CurioEvent>,

    pub movement: MovementLog,
    pub tracks: Arc<TrackCache>,
    pub evaluator: ThresholdEvaluator,
    pub tokens: Arc<TokenManager>,
    pub connection: ConnectionMonitor,
}

impl CurioSession {
    /// Build the service graph for one identity
    pub fn new(
        user_id: impl Into<String>,
        scrobble_user: impl Into<String>,
        db: Pool<Sqlite>,
        scrobbler: Arc<dyn ScrobbleService>,
        provider: Arc<dyn StreamingProvider>,
    ) -> Self {
        let user_id = user_id.into();
        let (event_tx, _) = broadcast::channel(100); // Buffer up to 100 events

        let movement = MovementLog::new(db.clone(), event_tx.clone());
        let tracks = Arc::new(TrackCache::new(
            user_id.clone(),
            scrobble_user,
            db.clone(),
            Arc::clone(&scrobbler),
            Arc::clone(&provider),
            event_tx.clone(),
        ));
        let evaluator = ThresholdEvaluator::new(Arc::clone(&tracks));
        let tokens = Arc::new(TokenManager::new(Arc::clone(&provider)));
        let connection = ConnectionMonitor::new(Arc::clone(&scrobbler), event_tx.clone());

        CurioSession {
            user_id,
            db,
            scrobbler,
            provider,
            event_tx,
            movement,
            tracks,
            evaluator,
            tokens,
            connection,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CurioEvent> {
        self.event_tx.subscribe()
    }

    /// The resolved pipeline for the stored stage records
    pub async fn resolve_pipeline(&self) -> Result<Vec<OrderedStage>> {
        let stages = db::stages::list_stages(&self.db).await?;
        pipeline::resolve(&stages)
    }

    /// Switch to another signed-in identity.
    ///
    /// Rebuilds every identity-scoped cache and invalidates memoized
    /// statuses; cached facts from the previous account must not be
    /// served to the new one.
    pub fn switch_identity(
        &mut self,
        user_id: impl Into<String>,
        scrobble_user: impl Into<String>,
    ) {
        let user_id = user_id.into();
        info!(from = %self.user_id, to = %user_id, "switching identity");

        self.tracks.clear();
        self.tracks = Arc::new(TrackCache::new(
            user_id.clone(),
            scrobble_user,
            self.db.clone(),
            Arc::clone(&self.scrobbler),
            Arc::clone(&self.provider),
            self.event_tx.clone(),
        ));
        self.evaluator = ThresholdEvaluator::new(Arc::clone(&self.tracks));
        self.tokens.clear();
        self.connection.invalidate();
        self.user_id = user_id.clone();

        let _ = self.event_tx.send(CurioEvent::IdentityChanged {
            user_id: Some(user_id),
            timestamp: Utc::now(),
        });
    }
}
