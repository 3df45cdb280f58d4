//! Connection-health monitor
//!
//! Probes scrobble-service reachability through the status cache so a
//! burst of UI checks collapses into one network call per TTL window.
//! An unreachable result is memoized too - an offline client must not
//! hammer the probe endpoint.

use crate::remote::scrobble::ScrobbleService;
use crate::status::StatusCache;
use chrono::{DateTime, Utc};
use curio_common::{CurioEvent, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Probe results are served from cache for this long
pub const HEALTH_TTL: Duration = Duration::from_secs(30);

/// Result of a reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

/// Deduplicated scrobble-service reachability checks
pub struct ConnectionMonitor {
    scrobbler: Arc<dyn ScrobbleService>,
    cache: StatusCache<ConnectionHealth>,
    event_tx: broadcast::Sender<CurioEvent>,
    last_reachable: Mutex<Option<bool>>,
}

impl ConnectionMonitor {
    pub fn new(scrobbler: Arc<dyn ScrobbleService>, event_tx: broadcast::Sender<CurioEvent>) -> Self {
        ConnectionMonitor {
            scrobbler,
            cache: StatusCache::new(),
            event_tx,
            last_reachable: Mutex::new(None),
        }
    }

    /// Current reachability for `user_id`, probing at most once per TTL
    /// window. Emits `ConnectionStatusChanged` when the answer flips.
    pub async fn check(&self, user_id: &str) -> Result<ConnectionHealth> {
        let scrobbler = Arc::clone(&self.scrobbler);
        let health = self
            .cache
            .get_or_compute(user_id, HEALTH_TTL, move || async move {
                let reachable = match scrobbler.ping().await {
                    Ok(()) => true,
                    Err(err) => {
                        debug!("health probe failed: {err}");
                        false
                    }
                };
                Ok(ConnectionHealth {
                    reachable,
                    checked_at: Utc::now(),
                })
            })
            .await?;

        let flipped = {
            let mut last = self.last_reachable.lock().unwrap_or_else(|p| p.into_inner());
            let flipped = *last != Some(health.reachable);
            *last = Some(health.reachable);
            flipped
        };

        if flipped {
            info!(reachable = health.reachable, "scrobble service reachability changed");
            let _ = self.event_tx.send(CurioEvent::ConnectionStatusChanged {
                reachable: health.reachable,
                timestamp: Utc::now(),
            });
        }

        Ok(health)
    }

    /// Forget cached probe results (identity switch)
    pub fn invalidate(&self) {
        self.cache.clear();
        *self.last_reachable.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}
