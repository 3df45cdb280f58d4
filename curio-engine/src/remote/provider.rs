//! Streaming-provider REST client
//!
//! Catalog reads (tracks, albums, playlists) and OAuth token refresh.
//! Batch metadata fetches are bounded and paced client-side so a large
//! album scan cannot trip the provider's rate limit.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use curio_common::{Error, Result};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A track record from the provider catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTrack {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album_id: Option<String>,
    pub duration_ms: u64,
}

/// An album record from the provider catalog
#[derive(Debug, Clone)]
pub struct ProviderAlbum {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub track_count: u32,
}

/// One page of a paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u32,
    pub offset: u32,
}

/// An OAuth access/refresh token pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Remaining validity from `now`
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.expires_at - now
    }
}

/// Streaming-provider operations the engine depends on
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    /// Fetch track records by catalog id; unknown ids are omitted
    async fn tracks_by_ids(&self, ids: &[String]) -> Result<Vec<ProviderTrack>>;

    /// Fetch album records by catalog id; unknown ids are omitted
    async fn albums_by_ids(&self, ids: &[String]) -> Result<Vec<ProviderAlbum>>;

    /// One page of an album's tracks
    async fn album_tracks(&self, album_id: &str, offset: u32, limit: u32)
        -> Result<Page<ProviderTrack>>;

    /// Exchange a refresh token for a fresh token pair
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair>;
}

/// Minimum-interval pacing for batch endpoints
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        RateLimiter {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the pacing interval
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Pacing batch request: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// Wire shapes

#[derive(Debug, Deserialize)]
struct WireArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<WireArtist>,
    #[serde(default)]
    album: Option<WireAlbumRef>,
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireAlbumRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireTracksBody {
    tracks: Vec<Option<WireTrack>>,
}

#[derive(Debug, Deserialize)]
struct WireAlbum {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<WireArtist>,
    total_tracks: u32,
}

#[derive(Debug, Deserialize)]
struct WireAlbumsBody {
    albums: Vec<Option<WireAlbum>>,
}

#[derive(Debug, Deserialize)]
struct WireTrackPage {
    items: Vec<WireTrack>,
    total: u32,
    offset: u32,
}

#[derive(Debug, Deserialize)]
struct WireTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

fn primary_artist(artists: &[WireArtist]) -> String {
    artists.first().map(|a| a.name.clone()).unwrap_or_default()
}

fn track_from_wire(t: WireTrack) -> ProviderTrack {
    ProviderTrack {
        artist: primary_artist(&t.artists),
        id: t.id,
        name: t.name,
        album_id: t.album.map(|a| a.id),
        duration_ms: t.duration_ms,
    }
}

/// REST client for the streaming provider
pub struct ProviderClient {
    http_client: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    access_token: RwLock<Option<String>>,
    batch_size: usize,
    rate_limiter: Arc<RateLimiter>,
}

impl ProviderClient {
    pub fn new(
        base_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        batch_size: usize,
        batch_pace_ms: u64,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("curio/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(ProviderClient {
            http_client,
            base_url: base_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            access_token: RwLock::new(None),
            batch_size: batch_size.max(1),
            rate_limiter: Arc::new(RateLimiter::new(batch_pace_ms)),
        })
    }

    /// Install the current access token (set after refresh)
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(|p| p.into_inner()) = token;
    }

    fn access_token(&self) -> Result<String> {
        self.access_token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| Error::ReconnectRequired("no provider access token".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.access_token()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(Error::ReconnectRequired("provider access token rejected".to_string()));
        }
        if status.as_u16() == 429 {
            return Err(Error::RateLimited("provider asked for backoff".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote {
                code: status.as_u16() as u32,
                message: body,
            });
        }

        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let token = self.access_token()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Remote {
                code: response.status().as_u16() as u32,
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn send_playlist(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let token = self.access_token()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .request(method, &url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Remote {
                code: response.status().as_u16() as u32,
                message: response.text().await.unwrap_or_default(),
            });
        }
        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }

    /// Create a playlist; returns its catalog id
    pub async fn create_playlist(&self, user_id: &str, name: &str) -> Result<String> {
        let body = self
            .send_playlist(
                reqwest::Method::POST,
                &format!("/users/{user_id}/playlists"),
                serde_json::json!({ "name": name }),
            )
            .await?;

        body.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Parse("playlist response missing id".to_string()))
    }

    /// Rename a playlist
    pub async fn update_playlist(&self, playlist_id: &str, name: &str) -> Result<()> {
        self.send_playlist(
            reqwest::Method::PUT,
            &format!("/playlists/{playlist_id}"),
            serde_json::json!({ "name": name }),
        )
        .await
        .map(|_| ())
    }

    /// Delete a playlist
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        self.delete(&format!("/playlists/{playlist_id}")).await
    }
}

#[async_trait]
impl StreamingProvider for ProviderClient {
    async fn tracks_by_ids(&self, ids: &[String]) -> Result<Vec<ProviderTrack>> {
        let mut tracks = Vec::with_capacity(ids.len());

        for batch in ids.chunks(self.batch_size) {
            self.rate_limiter.wait().await;
            let body: WireTracksBody = self
                .get_json("/tracks", &[("ids", batch.join(","))])
                .await?;
            tracks.extend(body.tracks.into_iter().flatten().map(track_from_wire));
        }

        debug!(requested = ids.len(), found = tracks.len(), "fetched track records");
        Ok(tracks)
    }

    async fn albums_by_ids(&self, ids: &[String]) -> Result<Vec<ProviderAlbum>> {
        let mut albums = Vec::with_capacity(ids.len());

        for batch in ids.chunks(self.batch_size) {
            self.rate_limiter.wait().await;
            let body: WireAlbumsBody = self
                .get_json("/albums", &[("ids", batch.join(","))])
                .await?;
            albums.extend(body.albums.into_iter().flatten().map(|a| ProviderAlbum {
                artist: primary_artist(&a.artists),
                id: a.id,
                name: a.name,
                track_count: a.total_tracks,
            }));
        }

        if albums.len() < ids.len() {
            warn!(
                requested = ids.len(),
                found = albums.len(),
                "some album ids were unknown to the provider"
            );
        }
        Ok(albums)
    }

    async fn album_tracks(
        &self,
        album_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ProviderTrack>> {
        let body: WireTrackPage = self
            .get_json(
                &format!("/albums/{album_id}/tracks"),
                &[("offset", offset.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        Ok(Page {
            items: body.items.into_iter().map(track_from_wire).collect(),
            total: body.total,
            offset: body.offset,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(Error::ReconnectRequired("refresh token rejected".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Remote {
                code: status.as_u16() as u32,
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: WireTokenResponse = response.json().await.map_err(|e| Error::Parse(e.to_string()))?;

        let pair = TokenPair {
            access_token: body.access_token,
            // The provider may omit the refresh token when it is unchanged
            refresh_token: body.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        };

        self.set_access_token(Some(pair.access_token.clone()));
        info!("provider access token refreshed");
        Ok(pair)
    }
}
