//! Integration tests for the unified track cache and sync queue
//!
//! Exercises optimistic writes against a failing remote, the retry
//! sweep, catalog-id drift resolution, and the clean-state guard on
//! full resyncs.

mod helpers;

use curio_common::db::models::SyncState;
use curio_engine::db;
use curio_engine::track::TrackCache;
use helpers::{at, make_track, test_db, MockProvider, MockScrobbler};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;

const USER: &str = "user-1";
const SCROBBLE_USER: &str = "listener";

struct Fixture {
    pool: sqlx::SqlitePool,
    scrobbler: Arc<MockScrobbler>,
    provider: Arc<MockProvider>,
    cache: TrackCache,
}

async fn setup(provider: MockProvider) -> Fixture {
    let pool = test_db().await;
    let scrobbler = Arc::new(MockScrobbler::new());
    let provider = Arc::new(provider);
    let (event_tx, _) = broadcast::channel(16);

    let cache = TrackCache::new(
        USER,
        SCROBBLE_USER,
        pool.clone(),
        Arc::clone(&scrobbler) as Arc<dyn curio_engine::remote::ScrobbleService>,
        Arc::clone(&provider) as Arc<dyn curio_engine::remote::StreamingProvider>,
        event_tx,
    );

    Fixture {
        pool,
        scrobbler,
        provider,
        cache,
    }
}

#[tokio::test]
async fn test_read_is_lazy_and_synchronous() {
    let fx = setup(MockProvider::new()).await;

    assert!(fx.cache.read("t1").is_none());
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));

    let entry = fx.cache.read("t1").unwrap();
    assert_eq!(entry.name, "Teardrop");
    assert_eq!(entry.playcount, 0);
    assert!(!entry.loved);
    assert_eq!(entry.sync_state, SyncState::Clean);
}

#[tokio::test]
async fn test_set_loved_success_round_trip() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));

    fx.cache.set_loved("t1", true).await.unwrap();

    let entry = fx.cache.read("t1").unwrap();
    assert!(entry.loved);
    assert_eq!(entry.sync_state, SyncState::Clean);
    assert!(entry.last_synced_at.is_some());

    let writes = fx.scrobbler.loved_writes.lock().unwrap();
    assert_eq!(
        writes.as_slice(),
        &[("Teardrop".to_string(), "Massive Attack".to_string(), true)]
    );
}

/// The optimistic value survives a failing remote and exactly one queue
/// item is created; a later successful sweep clears it.
#[tokio::test]
async fn test_failed_loved_write_keeps_intent_and_queues() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);

    // Transient failure is absorbed, not surfaced
    fx.cache.set_loved("t1", true).await.unwrap();

    let entry = fx.cache.read("t1").unwrap();
    assert!(entry.loved);
    assert_eq!(entry.sync_state, SyncState::Dirty);
    assert_eq!(db::sync_queue::pending_count(&fx.pool, USER).await.unwrap(), 1);

    // Service comes back; the sweep delivers the queued write
    fx.scrobbler.fail_writes.store(false, Ordering::SeqCst);
    let report = fx.cache.retry_failed_syncs().await.unwrap();
    assert_eq!((report.retried, report.succeeded, report.failed), (1, 1, 0));
    assert_eq!(db::sync_queue::pending_count(&fx.pool, USER).await.unwrap(), 0);

    let entry = fx.cache.read("t1").unwrap();
    assert!(entry.loved);
    assert_eq!(entry.sync_state, SyncState::Clean);
}

/// Re-enqueueing the same (track, operation) replaces the stale item:
/// the queue carries the latest intent only.
#[tokio::test]
async fn test_sync_queue_idempotency_key() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);

    fx.cache.set_loved("t1", true).await.unwrap();
    fx.cache.set_loved("t1", false).await.unwrap();

    assert_eq!(db::sync_queue::pending_count(&fx.pool, USER).await.unwrap(), 1);

    fx.scrobbler.fail_writes.store(false, Ordering::SeqCst);
    fx.cache.retry_failed_syncs().await.unwrap();

    // The delivered write is the newest intent
    let writes = fx.scrobbler.loved_writes.lock().unwrap();
    assert_eq!(
        writes.as_slice(),
        &[("Teardrop".to_string(), "Massive Attack".to_string(), false)]
    );
}

#[tokio::test]
async fn test_failed_sweep_increments_attempts() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);

    fx.cache.set_loved("t1", true).await.unwrap();
    let report = fx.cache.retry_failed_syncs().await.unwrap();
    assert_eq!((report.retried, report.succeeded, report.failed), (1, 0, 1));

    let items = db::sync_queue::list_pending(&fx.pool, USER).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 1);
    assert!(items[0].last_error.is_some());
}

/// A playcount update for an id the cache has never seen resolves to an
/// existing entry by (name, artist) when the provider knows the id.
#[tokio::test]
async fn test_update_playcount_resolves_catalog_drift() {
    // "t1-alt" is the playback source's id for the same recording
    let provider = MockProvider::with_tracks(&[make_track("t1-alt", "Teardrop", "Massive Attack")]);
    let fx = setup(provider).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));

    let resolved = fx.cache.update_playcount("t1-alt", 12).await.unwrap();
    assert_eq!(resolved, "t1");
    assert_eq!(fx.cache.read("t1").unwrap().playcount, 12);
    // No duplicate entry for the drifted id
    assert!(fx.cache.read("t1-alt").is_none());
}

/// A track observed only from playback is still remembered, even when
/// the provider lookup fails.
#[tokio::test]
async fn test_update_playcount_unknown_track_creates_entry() {
    let fx = setup(MockProvider::new()).await;
    fx.provider.fail_lookups.store(true, Ordering::SeqCst);

    let resolved = fx.cache.update_playcount("mystery", 3).await.unwrap();
    assert_eq!(resolved, "mystery");

    let entry = fx.cache.read("mystery").unwrap();
    assert_eq!(entry.playcount, 3);
    assert!(entry.name.is_empty());
}

#[tokio::test]
async fn test_record_play_increments_and_remembers_stage() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    let stage = helpers::stage_id(3);

    fx.cache.record_play("t1", Some(stage), at(100)).await.unwrap();
    fx.cache.record_play("t1", Some(stage), at(400)).await.unwrap();

    let entry = fx.cache.read("t1").unwrap();
    assert_eq!(entry.playcount, 2);
    assert_eq!(entry.last_played_from_stage, Some(stage));

    let scrobbles = fx.scrobbler.scrobbles.lock().unwrap();
    assert_eq!(scrobbles.len(), 2);
    assert_eq!(scrobbles[0].2, at(100));
}

/// A failed scrobble keeps the local count and queues the submission
/// with its original timestamp.
#[tokio::test]
async fn test_failed_scrobble_queued_with_original_timestamp() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);

    fx.cache.record_play("t1", None, at(100)).await.unwrap();
    assert_eq!(fx.cache.read("t1").unwrap().playcount, 1);

    fx.scrobbler.fail_writes.store(false, Ordering::SeqCst);
    let report = fx.cache.retry_failed_syncs().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let scrobbles = fx.scrobbler.scrobbles.lock().unwrap();
    assert_eq!(scrobbles.len(), 1);
    // Chronology preserved across the retry
    assert_eq!(scrobbles[0].2, at(100));
}

/// A full loved resync updates clean entries and never clobbers dirty
/// local intent.
#[tokio::test]
async fn test_refresh_loved_skips_dirty_entries() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.cache.observe_track(&make_track("t2", "Angel", "Massive Attack"));

    // t1 has a pending local unlove that the remote still reports loved
    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);
    fx.cache.set_loved("t1", false).await.unwrap();
    fx.scrobbler.fail_writes.store(false, Ordering::SeqCst);

    fx.scrobbler.set_loved_pages(vec![vec![
        ("Teardrop", "Massive Attack"),
        ("Angel", "Massive Attack"),
    ]]);

    let changed = fx.cache.refresh_loved().await.unwrap();
    assert_eq!(changed, 1);

    // Clean entry adopted the remote flag; dirty one kept local intent
    assert!(fx.cache.read("t2").unwrap().loved);
    assert!(!fx.cache.read("t1").unwrap().loved);
    assert_eq!(fx.cache.read("t1").unwrap().sync_state, SyncState::Dirty);
}

#[tokio::test]
async fn test_refresh_loved_walks_all_pages() {
    let fx = setup(MockProvider::new()).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));
    fx.cache.observe_track(&make_track("t2", "Angel", "Massive Attack"));

    fx.scrobbler.set_loved_pages(vec![
        vec![("Teardrop", "Massive Attack")],
        vec![("Angel", "Massive Attack")],
    ]);

    let changed = fx.cache.refresh_loved().await.unwrap();
    assert_eq!(changed, 2);
    assert!(fx.cache.read("t1").unwrap().loved);
    assert!(fx.cache.read("t2").unwrap().loved);
}

/// After a restart the entry map is empty but the queue persists; the
/// sweep resolves names through the provider.
#[tokio::test]
async fn test_sweep_survives_cache_loss() {
    let provider = MockProvider::with_tracks(&[make_track("t1", "Teardrop", "Massive Attack")]);
    let fx = setup(provider).await;
    fx.cache.observe_track(&make_track("t1", "Teardrop", "Massive Attack"));

    fx.scrobbler.fail_writes.store(true, Ordering::SeqCst);
    fx.cache.set_loved("t1", true).await.unwrap();

    // Simulated restart: memory cache gone, queue still durable
    fx.cache.clear();
    assert!(fx.cache.read("t1").is_none());
    assert_eq!(db::sync_queue::pending_count(&fx.pool, USER).await.unwrap(), 1);

    fx.scrobbler.fail_writes.store(false, Ordering::SeqCst);
    let report = fx.cache.retry_failed_syncs().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let writes = fx.scrobbler.loved_writes.lock().unwrap();
    assert_eq!(
        writes.as_slice(),
        &[("Teardrop".to_string(), "Massive Attack".to_string(), true)]
    );
}

#[tokio::test]
async fn test_set_loved_unknown_track_is_not_found() {
    let fx = setup(MockProvider::new()).await;
    let err = fx.cache.set_loved("nope", true).await.unwrap_err();
    assert!(matches!(err, curio_common::Error::NotFound(_)));
}
