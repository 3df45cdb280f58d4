//! Shared test fixtures: in-memory database and mock remote services
//! with injectable failure.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use curio_common::Result;
use curio_engine::remote::provider::{Page, ProviderAlbum, ProviderTrack, StreamingProvider, TokenPair};
use curio_engine::remote::scrobble::{LovedTrack, LovedTracksPage, RemoteTrackInfo, ScrobbleService};
use curio_common::db::models::{StageRecord, StageRole};
use curio_common::Error;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Route test logs through the capture writer; safe to call from every
/// test, only the first init wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn test_db() -> SqlitePool {
    init_tracing();
    curio_common::db::init_memory_database()
        .await
        .expect("in-memory database")
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

pub fn stage_id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn make_stage(n: u128, role: StageRole, next: Option<u128>, term: Option<u128>) -> StageRecord {
    StageRecord {
        id: stage_id(n),
        name: format!("stage-{n}"),
        role,
        next_stage_id: next.map(stage_id),
        termination_id: term.map(stage_id),
        group_id: stage_id(900),
        created_at: at(n as i64),
        deleted_at: None,
    }
}

pub fn make_track(id: &str, name: &str, artist: &str) -> ProviderTrack {
    ProviderTrack {
        id: id.to_string(),
        name: name.to_string(),
        artist: artist.to_string(),
        album_id: Some("album-1".to_string()),
        duration_ms: 200_000,
    }
}

/// Scrobble service double: records writes, fails on demand
#[derive(Default)]
pub struct MockScrobbler {
    pub fail_writes: AtomicBool,
    pub fail_ping: AtomicBool,
    pub ping_calls: AtomicUsize,
    pub loved_writes: Mutex<Vec<(String, String, bool)>>,
    pub scrobbles: Mutex<Vec<(String, String, DateTime<Utc>)>>,
    pub loved_pages: Mutex<Vec<LovedTracksPage>>,
}

impl MockScrobbler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loved_pages(&self, pages: Vec<Vec<(&str, &str)>>) {
        let total_pages = pages.len().max(1) as u32;
        let built = pages
            .into_iter()
            .enumerate()
            .map(|(i, tracks)| LovedTracksPage {
                tracks: tracks
                    .into_iter()
                    .map(|(name, artist)| LovedTrack {
                        name: name.to_string(),
                        artist: artist.to_string(),
                    })
                    .collect(),
                page: i as u32 + 1,
                total_pages,
            })
            .collect();
        *self.loved_pages.lock().unwrap() = built;
    }
}

#[async_trait]
impl ScrobbleService for MockScrobbler {
    async fn loved_tracks(&self, _user: &str, page: u32) -> Result<LovedTracksPage> {
        let pages = self.loved_pages.lock().unwrap();
        match pages.get(page as usize - 1) {
            Some(p) => Ok(p.clone()),
            None => Ok(LovedTracksPage {
                tracks: Vec::new(),
                page,
                total_pages: pages.len().max(1) as u32,
            }),
        }
    }

    async fn track_info(&self, name: &str, artist: &str, _user: &str) -> Result<RemoteTrackInfo> {
        Ok(RemoteTrackInfo {
            name: name.to_string(),
            artist: artist.to_string(),
            playcount: 0,
            loved: false,
        })
    }

    async fn set_loved(&self, name: &str, artist: &str, loved: bool) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Network("scrobble service unreachable".to_string()));
        }
        self.loved_writes
            .lock()
            .unwrap()
            .push((name.to_string(), artist.to_string(), loved));
        Ok(())
    }

    async fn scrobble(&self, name: &str, artist: &str, played_at: DateTime<Utc>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Network("scrobble service unreachable".to_string()));
        }
        self.scrobbles
            .lock()
            .unwrap()
            .push((name.to_string(), artist.to_string(), played_at));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::Network("scrobble service unreachable".to_string()));
        }
        Ok(())
    }
}

/// Streaming provider double backed by a static catalog
#[derive(Default)]
pub struct MockProvider {
    pub catalog: Mutex<HashMap<String, ProviderTrack>>,
    pub fail_lookups: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: &[ProviderTrack]) -> Self {
        let provider = Self::default();
        {
            let mut catalog = provider.catalog.lock().unwrap();
            for track in tracks {
                catalog.insert(track.id.clone(), track.clone());
            }
        }
        provider
    }
}

#[async_trait]
impl StreamingProvider for MockProvider {
    async fn tracks_by_ids(&self, ids: &[String]) -> Result<Vec<ProviderTrack>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Network("provider unreachable".to_string()));
        }
        let catalog = self.catalog.lock().unwrap();
        Ok(ids.iter().filter_map(|id| catalog.get(id).cloned()).collect())
    }

    async fn albums_by_ids(&self, _ids: &[String]) -> Result<Vec<ProviderAlbum>> {
        Ok(Vec::new())
    }

    async fn album_tracks(
        &self,
        album_id: &str,
        offset: u32,
        _limit: u32,
    ) -> Result<Page<ProviderTrack>> {
        let catalog = self.catalog.lock().unwrap();
        let items: Vec<ProviderTrack> = catalog
            .values()
            .filter(|t| t.album_id.as_deref() == Some(album_id))
            .cloned()
            .collect();
        Ok(Page {
            total: items.len() as u32,
            items,
            offset,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: "test-access".to_string(),
            refresh_token: "test-refresh".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
