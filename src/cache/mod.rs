use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{AppError, Result};

const EVENT_CAPACITY: usize = 64;

/// Staleness windows applied to one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Age below which a cached value is served without fetching.
    pub fresh: Duration,
    /// Age below which a stale value is still served while revalidating.
    pub retain: Duration,
}

impl CacheOptions {
    pub fn new(fresh: Duration, retain: Duration) -> Self {
        Self {
            fresh,
            retain: retain.max(fresh),
        }
    }
}

/// Value handed back by [`QueryCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub is_stale: bool,
    pub fetched_at: Instant,
}

/// Broadcast when a background or foreground fetch settles.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Refreshed { key: String },
    Failed { key: String, error: AppError },
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Refreshed { key } | CacheEvent::Failed { key, .. } => key,
        }
    }
}

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
    discard_after: Instant,
    /// Set by `revalidate`; cleared when a newer value lands.
    marked_stale: bool,
}

impl<T> CacheEntry<T> {
    fn is_stale(&self, now: Instant, options: CacheOptions) -> bool {
        self.marked_stale || now.saturating_duration_since(self.fetched_at) >= options.fresh
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    future: SharedFetch<T>,
}

struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    in_flight: Option<InFlight<T>>,
    last_error: Option<AppError>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            entry: None,
            in_flight: None,
            last_error: None,
        }
    }
}

impl<T> Slot<T> {
    fn is_empty(&self) -> bool {
        self.entry.is_none() && self.in_flight.is_none() && self.last_error.is_none()
    }
}

struct Inner<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    events: broadcast::Sender<CacheEvent>,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, key: &str, id: u64, retain: Duration, result: &Result<T>)
    where
        T: Clone,
    {
        let event = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.in_flight.as_ref().map(|f| f.id) != Some(id) {
                // Invalidated while in flight; the result is not stored.
                log::debug!("dropping superseded result for cache key {key}");
                return;
            }
            slot.in_flight = None;

            match result {
                Ok(value) => {
                    let now = Instant::now();
                    slot.entry = Some(CacheEntry {
                        value: value.clone(),
                        fetched_at: now,
                        discard_after: now + retain,
                        marked_stale: false,
                    });
                    slot.last_error = None;
                    CacheEvent::Refreshed {
                        key: key.to_string(),
                    }
                }
                Err(err) => {
                    // Any previous value stays as last-known-good.
                    slot.last_error = Some(err.clone());
                    CacheEvent::Failed {
                        key: key.to_string(),
                        error: err.clone(),
                    }
                }
            }
        };

        let _ = self.events.send(event);
    }
}

/// Keyed memoization of async results with separate freshness and retention
/// windows. Session-scoped and shared by every consumer; cloning shares the
/// storage.
///
/// Concurrent readers of a key share one in-flight request: the fetch is
/// wrapped in a [`Shared`] future that settles the slot exactly once and
/// hands the same result (or the same failure) to every waiter.
pub struct QueryCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Return the value for `key`, fetching when absent or expired.
    ///
    /// Fresh values return immediately. Values older than `fresh` but younger
    /// than `retain` return immediately marked stale while a background
    /// refresh runs. Otherwise the call awaits the (possibly shared) fetch.
    pub async fn get<F, Fut>(&self, key: &str, options: CacheOptions, fetcher: F) -> Result<Cached<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let now = Instant::now();
        let pending = {
            let mut slots = self.inner.slots();
            purge_locked(&mut slots, now, Some(key));
            let slot = slots.entry(key.to_string()).or_default();

            if let Some(entry) = slot.entry.as_mut() {
                let age = now.saturating_duration_since(entry.fetched_at);
                if age < options.retain {
                    entry.discard_after = entry.discard_after.max(now + options.retain);
                    let cached = Cached {
                        value: entry.value.clone(),
                        is_stale: entry.is_stale(now, options),
                        fetched_at: entry.fetched_at,
                    };
                    if cached.is_stale {
                        log::debug!("serving stale value for {key}; revalidating");
                        let fetch = self.ensure_fetch(slot, key, options, fetcher);
                        tokio::spawn(fetch);
                    }
                    return Ok(cached);
                }
                slot.entry = None;
            }

            self.ensure_fetch(slot, key, options, fetcher)
        };

        let value = pending.await?;
        Ok(Cached {
            value,
            is_stale: false,
            fetched_at: Instant::now(),
        })
    }

    /// Start a background fetch unless the key is fresh or already loading.
    /// Returns whether a fetch is now running for the key.
    pub fn prefetch<F, Fut>(&self, key: &str, options: CacheOptions, fetcher: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let now = Instant::now();
        let mut slots = self.inner.slots();
        let slot = slots.entry(key.to_string()).or_default();

        if let Some(entry) = &slot.entry {
            if !entry.is_stale(now, options) {
                return false;
            }
        }

        let fetch = self.ensure_fetch(slot, key, options, fetcher);
        tokio::spawn(fetch);
        true
    }

    /// Current value without triggering a fetch. Expired values are not returned.
    pub fn peek(&self, key: &str, options: CacheOptions) -> Option<Cached<T>> {
        let now = Instant::now();
        let slots = self.inner.slots();
        let entry = slots.get(key)?.entry.as_ref()?;
        let age = now.saturating_duration_since(entry.fetched_at);
        if age >= options.retain {
            return None;
        }
        Some(Cached {
            value: entry.value.clone(),
            is_stale: entry.is_stale(now, options),
            fetched_at: entry.fetched_at,
        })
    }

    /// Wait for the fetch currently running for `key`, if any.
    pub async fn wait(&self, key: &str) {
        let pending = self
            .inner
            .slots()
            .get(key)
            .and_then(|slot| slot.in_flight.as_ref().map(|f| f.future.clone()));
        if let Some(pending) = pending {
            let _ = pending.await;
        }
    }

    /// Error from the most recent settled fetch of `key`, cleared by a success.
    pub fn last_error(&self, key: &str) -> Option<AppError> {
        self.inner
            .slots()
            .get(key)
            .and_then(|slot| slot.last_error.clone())
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner
            .slots()
            .get(key)
            .map(|slot| slot.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Force the next lookup to treat `key` as absent. Results of a fetch
    /// already in flight are discarded when they arrive.
    pub fn invalidate(&self, key: &str) {
        if self.inner.slots().remove(key).is_some() {
            log::debug!("invalidated cache key {key}");
        }
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        self.inner
            .slots()
            .retain(|key, _| !key.starts_with(prefix));
    }

    /// Expire the freshness of `key` but keep its value as last-known-good
    /// until a refetch succeeds.
    pub fn revalidate(&self, key: &str) {
        self.revalidate_matching(|candidate| candidate == key);
    }

    pub fn revalidate_prefix(&self, prefix: &str) {
        self.revalidate_matching(|candidate| candidate.starts_with(prefix));
    }

    fn revalidate_matching(&self, matches: impl Fn(&str) -> bool) {
        self.inner.slots().retain(|key, slot| {
            if !matches(key.as_str()) {
                return true;
            }
            match slot.entry.as_mut() {
                Some(entry) => {
                    entry.marked_stale = true;
                    true
                }
                // Nothing to keep; a recorded failure should not block the next fetch.
                None => slot.in_flight.is_some(),
            }
        });
    }

    /// Drop entries whose retention lapsed without access.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.inner.slots();
        purge_locked(&mut slots, Instant::now(), None)
    }

    pub fn len(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Join the slot's in-flight fetch or start a new one.
    fn ensure_fetch<F, Fut>(
        &self,
        slot: &mut Slot<T>,
        key: &str,
        options: CacheOptions,
        fetcher: F,
    ) -> SharedFetch<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(in_flight) = &slot.in_flight {
            return in_flight.future.clone();
        }

        log::debug!("fetching cache key {key}");
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let fut = fetcher();
        let future = async move {
            let result = fut.await;
            inner.settle(&owned_key, id, options.retain, &result);
            result
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }
}

fn purge_locked<T>(slots: &mut HashMap<String, Slot<T>>, now: Instant, keep: Option<&str>) -> usize {
    let before = slots.len();
    slots.retain(|key, slot| {
        if keep == Some(key.as_str()) || slot.in_flight.is_some() {
            return true;
        }
        if slot.entry.as_ref().is_some_and(|entry| now >= entry.discard_after) {
            slot.entry = None;
        }
        !slot.is_empty()
    });
    before - slots.len()
}
