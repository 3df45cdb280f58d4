//! Provider token lifecycle
//!
//! Hands out a valid access token, refreshing proactively when the
//! remaining validity drops below ten minutes. Concurrent refreshes are
//! deduplicated through the status cache: two callers racing near
//! expiry must not issue two refresh calls, since the second would
//! invalidate the refresh token the first one just rotated.

use crate::remote::provider::{StreamingProvider, TokenPair};
use crate::status::StatusCache;
use chrono::{Duration as ChronoDuration, Utc};
use curio_common::{Error, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Refresh when remaining validity drops below this margin
const REFRESH_MARGIN_MINUTES: i64 = 10;

/// Memoization window for a completed refresh; long enough to absorb a
/// burst of callers, far shorter than any real token lifetime
const REFRESH_RESULT_TTL: Duration = Duration::from_secs(30);

const TOKEN_KEY: &str = "provider-token";

/// Identity-scoped provider credential manager
pub struct TokenManager {
    provider: Arc<dyn StreamingProvider>,
    cache: StatusCache<TokenPair>,
    current: RwLock<Option<TokenPair>>,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn StreamingProvider>) -> Self {
        TokenManager {
            provider,
            cache: StatusCache::new(),
            current: RwLock::new(None),
        }
    }

    /// Install the token pair obtained during account connection
    pub fn install(&self, pair: TokenPair) {
        info!(expires_at = %pair.expires_at, "provider credential installed");
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(pair);
        self.cache.invalidate(TOKEN_KEY);
    }

    /// Drop the stored credential (identity switch or revocation)
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = None;
        self.cache.invalidate(TOKEN_KEY);
    }

    /// True if a credential is installed (valid or not)
    pub fn is_connected(&self) -> bool {
        self.current.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// A currently valid access token, refreshing if needed.
    ///
    /// Refresh failure clears the credential and surfaces
    /// `ReconnectRequired`: retrying against a dead credential would
    /// only waste remote-call budget.
    pub async fn access_token(&self) -> Result<String> {
        let pair = self
            .current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| Error::ReconnectRequired("no provider credential".to_string()))?;

        if pair.remaining(Utc::now()) > ChronoDuration::minutes(REFRESH_MARGIN_MINUTES) {
            return Ok(pair.access_token);
        }

        let provider = Arc::clone(&self.provider);
        let refresh_token = pair.refresh_token.clone();
        let result = self
            .cache
            .get_or_compute(TOKEN_KEY, REFRESH_RESULT_TTL, move || async move {
                provider.refresh_token(&refresh_token).await
            })
            .await;

        match result {
            Ok(fresh) => {
                let access = fresh.access_token.clone();
                *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(fresh);
                Ok(access)
            }
            Err(err) => {
                warn!("token refresh failed, clearing credential: {err}");
                self.clear();
                Err(Error::ReconnectRequired(format!("token refresh failed: {err}")))
            }
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connected = self.is_connected();
        f.debug_struct("TokenManager").field("connected", &connected).finish()
    }
}
