//! Scrobble-service REST client
//!
//! Loved-track and playcount source of truth, authenticated by session
//! key. Domain errors carry the service's numeric code so callers can
//! distinguish "reconnect the account" from "try again shortly" from a
//! plain transport failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use curio_common::{Error, Result};
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::{debug, info};

/// Scrobble-service error codes that map to specific remedies
const CODE_INVALID_SESSION: u32 = 9;
const CODE_AUTH_FAILED: u32 = 4;
const CODE_RATE_LIMITED: u32 = 29;

/// Scrobble client errors
#[derive(Debug, ThisError)]
pub enum ScrobbleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error {code}: {message}")]
    Api { code: u32, message: String },

    #[error("HTTP error {0}")]
    Http(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No session key installed")]
    NoSession,
}

impl From<ScrobbleError> for Error {
    fn from(err: ScrobbleError) -> Error {
        match err {
            ScrobbleError::Api { code, message } => match code {
                CODE_INVALID_SESSION | CODE_AUTH_FAILED => Error::ReconnectRequired(message),
                CODE_RATE_LIMITED => Error::RateLimited(message),
                _ => Error::Remote { code, message },
            },
            ScrobbleError::Network(msg) => Error::Network(msg),
            ScrobbleError::Http(status) => Error::Network(format!("HTTP {status}")),
            ScrobbleError::Parse(msg) => Error::Parse(msg),
            ScrobbleError::NoSession => Error::ReconnectRequired("no session key".to_string()),
        }
    }
}

/// One loved track as reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LovedTrack {
    pub name: String,
    pub artist: String,
}

/// One page of the loved-tracks listing
#[derive(Debug, Clone)]
pub struct LovedTracksPage {
    pub tracks: Vec<LovedTrack>,
    pub page: u32,
    pub total_pages: u32,
}

/// Authoritative per-track facts from the remote service
#[derive(Debug, Clone)]
pub struct RemoteTrackInfo {
    pub name: String,
    pub artist: String,
    pub playcount: u32,
    pub loved: bool,
}

/// Remote scrobble service operations the engine depends on
#[async_trait]
pub trait ScrobbleService: Send + Sync {
    /// One page of the user's loved tracks
    async fn loved_tracks(&self, user: &str, page: u32) -> Result<LovedTracksPage>;

    /// Track info including the authoritative play count
    async fn track_info(&self, name: &str, artist: &str, user: &str) -> Result<RemoteTrackInfo>;

    /// Love or unlove a (track, artist) pair
    async fn set_loved(&self, name: &str, artist: &str, loved: bool) -> Result<()>;

    /// Submit a play with its original timestamp
    async fn scrobble(&self, name: &str, artist: &str, played_at: DateTime<Utc>) -> Result<()>;

    /// Cheap reachability probe
    async fn ping(&self) -> Result<()>;
}

// Wire shapes. The service reports numbers as JSON strings.

#[derive(Debug, Deserialize)]
struct WireError {
    error: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    name: String,
    artist: WireArtist,
}

#[derive(Debug, Deserialize)]
struct WirePageAttr {
    page: String,
    #[serde(rename = "totalPages")]
    total_pages: String,
}

#[derive(Debug, Deserialize)]
struct WireLovedTracks {
    #[serde(default)]
    track: Vec<WireTrack>,
    #[serde(rename = "@attr")]
    attr: WirePageAttr,
}

#[derive(Debug, Deserialize)]
struct WireLovedTracksBody {
    lovedtracks: WireLovedTracks,
}

#[derive(Debug, Deserialize)]
struct WireTrackInfo {
    name: String,
    artist: WireArtist,
    #[serde(default)]
    userplaycount: Option<String>,
    #[serde(default)]
    userloved: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTrackInfoBody {
    track: WireTrackInfo,
}

fn parse_number(raw: &str, field: &str) -> Result<u32> {
    raw.parse::<u32>()
        .map_err(|_| ScrobbleError::Parse(format!("{field}: '{raw}' is not a number")).into())
}

/// REST client for the scrobble service
pub struct ScrobbleClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    session_key: RwLock<Option<String>>,
}

impl ScrobbleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("curio/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(ScrobbleClient {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            session_key: RwLock::new(None),
        })
    }

    /// Install the session key obtained during account connection
    pub fn set_session_key(&self, session_key: Option<String>) {
        *self.session_key.write().unwrap_or_else(|p| p.into_inner()) = session_key;
    }

    fn session_key(&self) -> Result<String> {
        self.session_key
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| ScrobbleError::NoSession.into())
    }

    /// Decode a response, preferring the service's own error body over
    /// the HTTP status: domain errors can arrive with any status code.
    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from(ScrobbleError::Network(e.to_string())))?;

        if let Ok(err) = serde_json::from_str::<WireError>(&body) {
            return Err(ScrobbleError::Api {
                code: err.error,
                message: err.message,
            }
            .into());
        }

        if !status.is_success() {
            return Err(ScrobbleError::Http(status.as_u16()).into());
        }

        serde_json::from_str(&body).map_err(|e| ScrobbleError::Parse(e.to_string()).into())
    }

    /// Like `decode`, for write endpoints whose success body carries
    /// nothing we need
    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from(ScrobbleError::Network(e.to_string())))?;

        if let Ok(err) = serde_json::from_str::<WireError>(&body) {
            return Err(ScrobbleError::Api {
                code: err.error,
                message: err.message,
            }
            .into());
        }

        if !status.is_success() {
            return Err(ScrobbleError::Http(status.as_u16()).into());
        }

        Ok(())
    }

    async fn get(&self, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.http_client
            .get(&self.base_url)
            .query(&[("api_key", self.api_key.as_str()), ("format", "json")])
            .query(query)
            .send()
            .await
            .map_err(|e| ScrobbleError::Network(e.to_string()).into())
    }

    async fn post(&self, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        let sk = self.session_key()?;
        let mut params: Vec<(&str, &str)> = vec![
            ("api_key", self.api_key.as_str()),
            ("format", "json"),
            ("sk", sk.as_str()),
        ];
        params.extend_from_slice(form);

        self.http_client
            .post(&self.base_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ScrobbleError::Network(e.to_string()).into())
    }
}

#[async_trait]
impl ScrobbleService for ScrobbleClient {
    async fn loved_tracks(&self, user: &str, page: u32) -> Result<LovedTracksPage> {
        let page_param = page.to_string();
        debug!(user, page, "fetching loved tracks page");

        let response = self
            .get(&[
                ("method", "user.getlovedtracks"),
                ("user", user),
                ("page", page_param.as_str()),
            ])
            .await?;

        let body: WireLovedTracksBody = Self::decode(response).await?;
        let tracks = body
            .lovedtracks
            .track
            .into_iter()
            .map(|t| LovedTrack {
                name: t.name,
                artist: t.artist.name,
            })
            .collect();

        Ok(LovedTracksPage {
            tracks,
            page: parse_number(&body.lovedtracks.attr.page, "page")?,
            total_pages: parse_number(&body.lovedtracks.attr.total_pages, "totalPages")?,
        })
    }

    async fn track_info(&self, name: &str, artist: &str, user: &str) -> Result<RemoteTrackInfo> {
        let response = self
            .get(&[
                ("method", "track.getInfo"),
                ("track", name),
                ("artist", artist),
                ("username", user),
            ])
            .await?;

        let body: WireTrackInfoBody = Self::decode(response).await?;
        let playcount = match body.track.userplaycount.as_deref() {
            Some(raw) => parse_number(raw, "userplaycount")?,
            None => 0,
        };

        Ok(RemoteTrackInfo {
            name: body.track.name,
            artist: body.track.artist.name,
            playcount,
            loved: body.track.userloved.as_deref() == Some("1"),
        })
    }

    async fn set_loved(&self, name: &str, artist: &str, loved: bool) -> Result<()> {
        let method = if loved { "track.love" } else { "track.unlove" };
        let response = self
            .post(&[("method", method), ("track", name), ("artist", artist)])
            .await?;

        Self::check(response).await?;
        info!(track = name, artist, loved, "loved flag written to scrobble service");
        Ok(())
    }

    async fn scrobble(&self, name: &str, artist: &str, played_at: DateTime<Utc>) -> Result<()> {
        let timestamp = played_at.timestamp().to_string();
        let response = self
            .post(&[
                ("method", "track.scrobble"),
                ("track", name),
                ("artist", artist),
                ("timestamp", timestamp.as_str()),
            ])
            .await?;

        Self::check(response).await?;
        info!(track = name, artist, "play submitted to scrobble service");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let response = self.get(&[("method", "auth.getSessionInfo")]).await?;
        Self::check(response).await
    }
}
