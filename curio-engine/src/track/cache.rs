//! Unified track cache
//!
//! Per-identity local store of track facts (loved flag, play count,
//! last-played-from context). Reads are synchronous and never block on
//! the network; writes are optimistic - the local value is updated
//! first, then pushed to the scrobble service, and a failed push lands
//! in the durable sync queue for a later sweep. The user's intent
//! always wins over the last-known-remote value until a write
//! round-trips.
//!
//! Entries live in memory only and are rebuilt from album scans; the
//! sync queue is the single durable piece.

use crate::db;
use crate::remote::provider::{ProviderTrack, StreamingProvider};
use crate::remote::scrobble::ScrobbleService;
use chrono::{DateTime, Utc};
use curio_common::db::models::{SyncOperation, SyncQueueItem, SyncState, TrackCacheEntry};
use curio_common::{CurioEvent, Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one retry sweep over the sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSweepReport {
    pub retried: usize,
    pub succeeded: usize,
    pub failed: usize,
}

struct EntrySlot {
    entry: TrackCacheEntry,
    /// Bumped on every local loved write; a remote ack only marks the
    /// entry Clean when no newer write raced it
    generation: u64,
}

type EntryMap = HashMap<String, EntrySlot>;

fn read_entries(entries: &RwLock<EntryMap>) -> RwLockReadGuard<'_, EntryMap> {
    entries.read().unwrap_or_else(|p| p.into_inner())
}

fn write_entries(entries: &RwLock<EntryMap>) -> RwLockWriteGuard<'_, EntryMap> {
    entries.write().unwrap_or_else(|p| p.into_inner())
}

/// Identity-scoped track fact cache with write-behind synchronization
pub struct TrackCache {
    user_id: String,
    /// Scrobble-service account name for loved/playcount lookups
    scrobble_user: String,
    db: Pool<Sqlite>,
    scrobbler: Arc<dyn ScrobbleService>,
    provider: Arc<dyn StreamingProvider>,
    entries: RwLock<EntryMap>,
    event_tx: broadcast::Sender<CurioEvent>,
}

impl TrackCache {
    pub fn new(
        user_id: impl Into<String>,
        scrobble_user: impl Into<String>,
        db: Pool<Sqlite>,
        scrobbler: Arc<dyn ScrobbleService>,
        provider: Arc<dyn StreamingProvider>,
        event_tx: broadcast::Sender<CurioEvent>,
    ) -> Self {
        TrackCache {
            user_id: user_id.into(),
            scrobble_user: scrobble_user.into(),
            db,
            scrobbler,
            provider,
            entries: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Synchronous read; never suspends
    pub fn read(&self, track_id: &str) -> Option<TrackCacheEntry> {
        read_entries(&self.entries)
            .get(track_id)
            .map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        read_entries(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read_entries(&self.entries).is_empty()
    }

    /// Lazily create an entry for a track seen during a stage or album
    /// scan. Returns true if the entry was created.
    pub fn observe_track(&self, track: &ProviderTrack) -> bool {
        let mut entries = write_entries(&self.entries);
        if entries.contains_key(&track.id) {
            return false;
        }
        entries.insert(
            track.id.clone(),
            EntrySlot {
                entry: TrackCacheEntry {
                    track_id: track.id.clone(),
                    name: track.name.clone(),
                    artist: track.artist.clone(),
                    loved: false,
                    playcount: 0,
                    sync_state: SyncState::Clean,
                    last_synced_at: None,
                    last_played_from_stage: None,
                },
                generation: 0,
            },
        );
        true
    }

    /// Populate the cache from an album's track listing
    pub fn ingest_album_tracks(&self, tracks: &[ProviderTrack]) -> usize {
        let created = tracks.iter().filter(|t| self.observe_track(t)).count();
        debug!(seen = tracks.len(), created, "ingested album tracks");
        created
    }

    /// Optimistically set the loved flag and push it to the scrobble
    /// service.
    ///
    /// The local value is written before the remote call and survives a
    /// remote failure: the failed write is queued for retry instead.
    /// Transient failures are absorbed; conditions needing user action
    /// (reconnect, backoff) are returned after queueing.
    pub async fn set_loved(&self, track_id: &str, loved: bool) -> Result<()> {
        let (name, artist, generation) = {
            let mut entries = write_entries(&self.entries);
            let slot = entries
                .get_mut(track_id)
                .ok_or_else(|| Error::NotFound(format!("track {track_id} not in cache")))?;
            slot.generation += 1;
            slot.entry.loved = loved;
            slot.entry.sync_state = SyncState::Syncing;
            (slot.entry.name.clone(), slot.entry.artist.clone(), slot.generation)
        };

        let _ = self.event_tx.send(CurioEvent::TrackLoveChanged {
            track_id: track_id.to_string(),
            loved,
            timestamp: Utc::now(),
        });

        match self.scrobbler.set_loved(&name, &artist, loved).await {
            Ok(()) => {
                let mut entries = write_entries(&self.entries);
                if let Some(slot) = entries.get_mut(track_id) {
                    if slot.generation == generation {
                        slot.entry.sync_state = SyncState::Clean;
                        slot.entry.last_synced_at = Some(Utc::now());
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(track_id, loved, "loved write failed, queueing for retry: {err}");
                {
                    let mut entries = write_entries(&self.entries);
                    if let Some(slot) = entries.get_mut(track_id) {
                        if slot.generation == generation {
                            slot.entry.sync_state = SyncState::Dirty;
                        }
                    }
                }
                db::sync_queue::enqueue(
                    &self.db,
                    &self.user_id,
                    track_id,
                    &SyncOperation::SetLoved { loved },
                    &err.to_string(),
                    Utc::now(),
                )
                .await?;

                if err.is_transient() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Set a track's play count, resolving catalog-id drift.
    ///
    /// Resolution order: exact entry by id, then (name, artist) match
    /// via a provider lookup, then a fresh entry - a track observed
    /// only from playback is still worth remembering. Returns the
    /// resolved id.
    pub async fn update_playcount(&self, track_id: &str, new_count: u32) -> Result<String> {
        let resolved_id = self.resolve_or_create(track_id).await?;

        let mut entries = write_entries(&self.entries);
        if let Some(slot) = entries.get_mut(&resolved_id) {
            slot.entry.playcount = new_count;
        }
        Ok(resolved_id)
    }

    /// Count one play: bump the cached play count, remember the stage
    /// context, and submit the scrobble. A failed submission is queued
    /// with its original timestamp so chronology survives the retry.
    pub async fn record_play(
        &self,
        track_id: &str,
        origin_stage: Option<Uuid>,
        played_at: DateTime<Utc>,
    ) -> Result<String> {
        let resolved_id = self.resolve_or_create(track_id).await?;

        let (name, artist, playcount) = {
            let mut entries = write_entries(&self.entries);
            let slot = entries
                .get_mut(&resolved_id)
                .ok_or_else(|| Error::Internal(format!("resolved entry {resolved_id} vanished")))?;
            slot.entry.playcount += 1;
            slot.entry.last_played_from_stage = origin_stage;
            (slot.entry.name.clone(), slot.entry.artist.clone(), slot.entry.playcount)
        };

        info!(track_id = %resolved_id, playcount, stage = ?origin_stage, "play recorded");
        let _ = self.event_tx.send(CurioEvent::PlayRecorded {
            track_id: resolved_id.clone(),
            playcount,
            stage_id: origin_stage,
            timestamp: played_at,
        });

        if let Err(err) = self.scrobbler.scrobble(&name, &artist, played_at).await {
            warn!(track_id = %resolved_id, "scrobble failed, queueing for retry: {err}");
            db::sync_queue::enqueue(
                &self.db,
                &self.user_id,
                &resolved_id,
                &SyncOperation::SetPlaycount { playcount, played_at },
                &err.to_string(),
                Utc::now(),
            )
            .await?;
        }

        Ok(resolved_id)
    }

    /// Sweep the sync queue, re-attempting each failed remote write.
    /// Succeeded items are removed; failures stay with their attempt
    /// count bumped. Safe to call repeatedly - delivery downstream is
    /// at-least-once.
    pub async fn retry_failed_syncs(&self) -> Result<SyncSweepReport> {
        let items = db::sync_queue::list_pending(&self.db, &self.user_id).await?;
        let mut report = SyncSweepReport::default();

        for item in items {
            report.retried += 1;
            match self.attempt_sync(&item).await {
                Ok(()) => {
                    db::sync_queue::remove(&self.db, item.id).await?;
                    report.succeeded += 1;
                }
                Err(err) => {
                    db::sync_queue::record_failure(&self.db, item.id, &err.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        if report.retried > 0 {
            info!(
                retried = report.retried,
                succeeded = report.succeeded,
                failed = report.failed,
                "sync queue sweep finished"
            );
        }
        let _ = self.event_tx.send(CurioEvent::SyncSweepCompleted {
            retried: report.retried,
            succeeded: report.succeeded,
            failed: report.failed,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Full resync of the loved flag from the scrobble service.
    ///
    /// Only entries in Clean state are overwritten: a dirty entry holds
    /// local intent that has not round-tripped yet, and the resync must
    /// not clobber it. Returns the number of entries whose flag changed.
    pub async fn refresh_loved(&self) -> Result<usize> {
        let mut loved: HashSet<(String, String)> = HashSet::new();
        let mut page = 1;
        loop {
            let batch = self.scrobbler.loved_tracks(&self.scrobble_user, page).await?;
            if batch.tracks.is_empty() {
                break;
            }
            for track in &batch.tracks {
                loved.insert((track.name.to_lowercase(), track.artist.to_lowercase()));
            }
            if page >= batch.total_pages {
                break;
            }
            page += 1;
        }

        let now = Utc::now();
        let mut changed = 0;
        let mut skipped = 0;
        {
            let mut entries = write_entries(&self.entries);
            for slot in entries.values_mut() {
                if slot.entry.sync_state != SyncState::Clean {
                    skipped += 1;
                    continue;
                }
                let key = (slot.entry.name.to_lowercase(), slot.entry.artist.to_lowercase());
                let remote_loved = loved.contains(&key);
                if slot.entry.loved != remote_loved {
                    slot.entry.loved = remote_loved;
                    changed += 1;
                }
                slot.entry.last_synced_at = Some(now);
            }
        }

        info!(changed, skipped, "loved tracks resynced");
        Ok(changed)
    }

    /// Adopt the remote service's authoritative playcount and loved
    /// flag for one track. Skipped while a local write is pending.
    pub async fn reconcile_track_info(&self, track_id: &str) -> Result<()> {
        let (name, artist, state) = {
            let entries = read_entries(&self.entries);
            let slot = entries
                .get(track_id)
                .ok_or_else(|| Error::NotFound(format!("track {track_id} not in cache")))?;
            (slot.entry.name.clone(), slot.entry.artist.clone(), slot.entry.sync_state)
        };

        if state != SyncState::Clean {
            debug!(track_id, "skipping reconcile for non-clean entry");
            return Ok(());
        }

        let info = self
            .scrobbler
            .track_info(&name, &artist, &self.scrobble_user)
            .await?;

        let mut entries = write_entries(&self.entries);
        if let Some(slot) = entries.get_mut(track_id) {
            if slot.entry.sync_state == SyncState::Clean {
                slot.entry.playcount = info.playcount;
                slot.entry.loved = info.loved;
                slot.entry.last_synced_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    /// Wipe the cache (identity switch). The sync queue is per-user and
    /// stays durable for the owning identity.
    pub fn clear(&self) {
        write_entries(&self.entries).clear();
    }

    /// Resolve a playback-source track id to a cache entry id,
    /// creating an entry when resolution fails entirely.
    async fn resolve_or_create(&self, track_id: &str) -> Result<String> {
        if read_entries(&self.entries).contains_key(track_id) {
            return Ok(track_id.to_string());
        }

        // Remote lookup fallback: the playback source and the cache can
        // disagree on catalog ids for the same recording, so match by
        // (name, artist) before creating a duplicate entry.
        let looked_up = match self.provider.tracks_by_ids(&[track_id.to_string()]).await {
            Ok(tracks) => tracks.into_iter().next(),
            Err(err) => {
                warn!(track_id, "provider lookup failed during id resolution: {err}");
                None
            }
        };

        let mut entries = write_entries(&self.entries);
        // A concurrent caller may have resolved it while we were away
        if entries.contains_key(track_id) {
            return Ok(track_id.to_string());
        }

        if let Some(track) = &looked_up {
            let matched = entries
                .iter()
                .find(|(_, slot)| {
                    slot.entry.name.eq_ignore_ascii_case(&track.name)
                        && slot.entry.artist.eq_ignore_ascii_case(&track.artist)
                })
                .map(|(id, _)| id.clone());
            if let Some(existing_id) = matched {
                debug!(track_id, resolved = %existing_id, "resolved drifted catalog id by name/artist");
                return Ok(existing_id);
            }
        }

        let (name, artist) = looked_up
            .map(|t| (t.name, t.artist))
            .unwrap_or_else(|| (String::new(), String::new()));

        debug!(track_id, "creating cache entry for unknown playback track");
        entries.insert(
            track_id.to_string(),
            EntrySlot {
                entry: TrackCacheEntry {
                    track_id: track_id.to_string(),
                    name,
                    artist,
                    loved: false,
                    playcount: 0,
                    sync_state: SyncState::Clean,
                    last_synced_at: None,
                    last_played_from_stage: None,
                },
                generation: 0,
            },
        );
        Ok(track_id.to_string())
    }

    /// Re-deliver one queued operation
    async fn attempt_sync(&self, item: &SyncQueueItem) -> Result<()> {
        let cached = {
            let entries = read_entries(&self.entries);
            entries
                .get(&item.track_id)
                .map(|slot| (slot.entry.name.clone(), slot.entry.artist.clone()))
        };

        // The entry map is memory-resident; after a restart the queue
        // outlives it, so fall back to a provider lookup for the names.
        let (name, artist) = match cached {
            Some(pair) => pair,
            None => {
                let track = self
                    .provider
                    .tracks_by_ids(&[item.track_id.clone()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        Error::NotFound(format!("track {} unknown to provider", item.track_id))
                    })?;
                (track.name, track.artist)
            }
        };

        match &item.operation {
            SyncOperation::SetLoved { loved } => {
                self.scrobbler.set_loved(&name, &artist, *loved).await?;
                let mut entries = write_entries(&self.entries);
                if let Some(slot) = entries.get_mut(&item.track_id) {
                    // Only settle if the queued value is still the
                    // local intent; a newer write replaced the item
                    // under the same idempotency key otherwise.
                    if slot.entry.loved == *loved {
                        slot.entry.sync_state = SyncState::Clean;
                        slot.entry.last_synced_at = Some(Utc::now());
                    }
                }
                Ok(())
            }
            SyncOperation::SetPlaycount { played_at, .. } => {
                self.scrobbler.scrobble(&name, &artist, *played_at).await
            }
        }
    }
}
