//! Query cache with single-flight refetch.
//!
//! Entries are keyed by [`CacheKey`]. Invalidation is level-triggered: it only
//! marks an entry stale and makes sure one refetch is running. Any number of
//! invalidations (or reads) issued while that refetch is pending join it, so
//! a burst of push events costs exactly one request per key.
//!
//! Keys nobody has read are not tracked; invalidating them is a no-op and the
//! first [`QueryCache::get`] fetches them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use donorlink_core::{CacheKey, Error, ResourceFetcher, Result};

type FetchOutcome = std::result::Result<Arc<JsonValue>, String>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct Entry {
    value: Option<Arc<JsonValue>>,
    last_fetched_at: Option<DateTime<Utc>>,
    is_stale: bool,
    in_flight: Option<(u64, SharedFetch)>,
}

impl Entry {
    fn empty() -> Self {
        Self {
            value: None,
            last_fetched_at: None,
            is_stale: true,
            in_flight: None,
        }
    }
}

/// Point-in-time view of one entry, read without fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub key: CacheKey,
    /// Last successfully fetched value, if any.
    pub value: Option<Arc<JsonValue>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    /// A refetch is pending.
    pub refetching: bool,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Fetches started against the collaborator.
    pub fetches: u64,
    pub fetch_errors: u64,
    /// Reads and invalidations that joined a pending fetch.
    pub collapsed: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    collapsed: AtomicU64,
}

struct QueryCacheInner {
    fetcher: Arc<dyn ResourceFetcher>,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    next_fetch_id: AtomicU64,
    counters: Counters,
}

impl QueryCacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a fetch result, unless a newer fetch replaced this one.
    fn complete(&self, key: &CacheKey, fetch_id: u64, outcome: &FetchOutcome) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !matches!(entry.in_flight, Some((current, _)) if current == fetch_id) {
            return;
        }
        entry.in_flight = None;
        match outcome {
            Ok(value) => {
                entry.value = Some(Arc::clone(value));
                entry.last_fetched_at = Some(Utc::now());
                entry.is_stale = false;
                debug!(%key, fetch_id, "Refetch completed");
            }
            Err(e) => {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, fetch_id, error = %e, "Refetch failed, entry stays stale");
            }
        }
    }
}

/// Session-scoped query cache. Cheap to clone.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<QueryCacheInner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl QueryCache {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            inner: Arc::new(QueryCacheInner {
                fetcher,
                entries: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Read a key, fetching when it is missing or stale.
    ///
    /// Concurrent reads of the same key share one fetch. When a refetch of
    /// a stale entry fails, the last-known value is served instead.
    pub async fn get(&self, key: &CacheKey) -> Result<Arc<JsonValue>> {
        let (fetch, fallback) = {
            let mut entries = self.inner.entries();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);

            if let (Some(value), false) = (&entry.value, entry.is_stale) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(value));
            }
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);

            let pending = entry
                .in_flight
                .as_ref()
                .map(|(fetch_id, fetch)| (*fetch_id, fetch.clone()));
            let fetch = match pending {
                Some((fetch_id, fetch)) => {
                    self.inner.counters.collapsed.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, fetch_id, "Read joined pending fetch");
                    fetch
                }
                None => self.start_fetch(key, entry),
            };
            (fetch, entry.value.clone())
        };

        match fetch.await {
            Ok(value) => Ok(value),
            Err(e) => match fallback {
                Some(stale) => {
                    debug!(%key, error = %e, "Serving last-known value");
                    Ok(stale)
                }
                None => Err(Error::Fetch(format!("{key}: {e}"))),
            },
        }
    }

    /// Mark a key stale and make sure one refetch is pending.
    ///
    /// Returns `false` when the key has never been read.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(key) else {
            debug!(%key, "Invalidation of unobserved key ignored");
            return false;
        };
        entry.is_stale = true;
        match entry.in_flight.as_ref().map(|(fetch_id, _)| *fetch_id) {
            Some(fetch_id) => {
                self.inner.counters.collapsed.fetch_add(1, Ordering::Relaxed);
                debug!(%key, fetch_id, "Invalidation collapsed into pending fetch");
            }
            None => {
                let _ = self.start_fetch(key, entry);
            }
        }
        true
    }

    /// Invalidate every tracked key. Returns how many were tracked.
    pub fn invalidate_all(&self) -> usize {
        let keys = self.keys();
        for key in &keys {
            self.invalidate(key);
        }
        debug!(count = keys.len(), "Invalidated all cache entries");
        keys.len()
    }

    /// Last-known value and staleness, without fetching.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheSnapshot> {
        self.inner.entries().get(key).map(|entry| CacheSnapshot {
            key: key.clone(),
            value: entry.value.clone(),
            last_fetched_at: entry.last_fetched_at,
            is_stale: entry.is_stale,
            refetching: entry.in_flight.is_some(),
        })
    }

    /// Whether a read of `key` would fetch. Untracked keys count as stale.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.inner
            .entries()
            .get(key)
            .map(|entry| entry.is_stale || entry.value.is_none())
            .unwrap_or(true)
    }

    /// Tracked keys, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.inner.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Pending fetches finish but their results are
    /// discarded.
    pub fn clear(&self) {
        self.inner.entries().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_errors: c.fetch_errors.load(Ordering::Relaxed),
            collapsed: c.collapsed.load(Ordering::Relaxed),
        }
    }

    /// Create the shared fetch for `key`, record it on the entry and drive it
    /// in the background when a runtime is available.
    fn start_fetch(&self, key: &CacheKey, entry: &mut Entry) -> SharedFetch {
        let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let fetcher = Arc::clone(&self.inner.fetcher);
        let weak: Weak<QueryCacheInner> = Arc::downgrade(&self.inner);
        let owned_key = key.clone();

        let fetch: SharedFetch = async move {
            let outcome = fetcher
                .fetch(&owned_key)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string());
            if let Some(inner) = weak.upgrade() {
                inner.complete(&owned_key, fetch_id, &outcome);
            }
            outcome
        }
        .boxed()
        .shared();

        entry.in_flight = Some((fetch_id, fetch.clone()));
        debug!(%key, fetch_id, "Refetch started");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = fetch.clone();
            handle.spawn(async move {
                let _ = driver.await;
            });
        }
        fetch
    }
}
