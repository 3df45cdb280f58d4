//! Request deduplicator / status cache
//!
//! Collapses concurrent identical requests into one in-flight call and
//! memoizes the result for a short time-to-live. Used in front of any
//! externally rate-limited check: connection-health probes and token
//! refresh, where duplicate concurrent refreshes could invalidate each
//! other's refresh tokens.
//!
//! The map mutex is never held across an await; the in-flight future is
//! shared between callers and clears its own slot on completion, so a
//! failed computation can be retried by the next caller.

use curio_common::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

type SharedComputation<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

struct Slot<T> {
    value: Option<(T, Instant)>,
    in_flight: Option<SharedComputation<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            value: None,
            in_flight: None,
        }
    }
}

/// Generic memoizing request deduplicator
///
/// At most one computation per key is in flight at a time; callers
/// racing on the same key receive the same settled result.
pub struct StatusCache<T> {
    slots: Arc<Mutex<HashMap<String, Slot<T>>>>,
}

fn lock_slots<T>(
    slots: &Mutex<HashMap<String, Slot<T>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Slot<T>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> StatusCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        StatusCache {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the memoized value for `key` if younger than `ttl`;
    /// otherwise join the in-flight computation or start `compute`.
    ///
    /// The in-flight handle is cleared on success and failure alike, so
    /// a subsequent call after a failure retries.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let computation = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(key.to_string()).or_default();

            if let Some((value, computed_at)) = &slot.value {
                if computed_at.elapsed() < ttl {
                    return Ok(value.clone());
                }
            }

            if let Some(pending) = &slot.in_flight {
                debug!(key, "joining in-flight computation");
                pending.clone()
            } else {
                debug!(key, "starting computation");
                let slots_ref = Arc::clone(&self.slots);
                let key_owned = key.to_string();
                let fut = compute();
                let computation: SharedComputation<T> = async move {
                    let result = fut.await.map_err(Arc::new);
                    // Settle the slot from inside the shared future so
                    // cleanup runs exactly once, for every caller.
                    let mut slots = lock_slots(&slots_ref);
                    let slot = slots.entry(key_owned).or_default();
                    slot.in_flight = None;
                    if let Ok(value) = &result {
                        slot.value = Some((value.clone(), Instant::now()));
                    }
                    result
                }
                .boxed()
                .shared();
                slot.in_flight = Some(computation.clone());
                computation
            }
        };

        computation.await.map_err(Error::Shared)
    }

    /// Peek at the memoized value without computing
    pub fn get_if_fresh(&self, key: &str, ttl: Duration) -> Option<T> {
        let slots = lock_slots(&self.slots);
        slots.get(key).and_then(|slot| {
            slot.value
                .as_ref()
                .filter(|(_, at)| at.elapsed() < ttl)
                .map(|(v, _)| v.clone())
        })
    }

    /// Drop the memoized value for `key`. Must be called when the
    /// owning identity changes. An in-flight computation is left to
    /// finish; its result lands in a fresh slot and the next caller
    /// decides whether it is still wanted.
    pub fn invalidate(&self, key: &str) {
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get_mut(key) {
            slot.value = None;
        }
    }

    /// Drop every memoized value (identity switch)
    pub fn clear(&self) {
        let mut slots = lock_slots(&self.slots);
        for slot in slots.values_mut() {
            slot.value = None;
        }
    }
}

impl<T> Default for StatusCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
