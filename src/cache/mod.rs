//! Per-key data cache with TTL staleness, loading flags and refresh timers.
//!
//! The cache never fetches anything itself. Callers check [`DataCache::is_loading`]
//! before starting a fetch so at most one refresh per key is in flight, and
//! arm [`DataCache::schedule_refresh`] after each completed refresh.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Interval applied when `set` is called on a key that was never initialized.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<V> {
    data: Option<V>,
    last_updated: Option<Instant>,
    refresh_interval: Duration,
    is_loading: bool,
}

impl<V> CacheEntry<V> {
    fn empty(refresh_interval: Duration) -> Self {
        Self {
            data: None,
            last_updated: None,
            refresh_interval,
            is_loading: false,
        }
    }

    fn is_stale(&self) -> bool {
        match self.last_updated {
            Some(at) => at.elapsed() > self.refresh_interval,
            None => true,
        }
    }
}

/// Read-only copy of a cache entry, including the derived staleness flag.
#[derive(Debug, Clone)]
pub struct CacheEntryView<V> {
    pub data: Option<V>,
    pub last_updated: Option<Instant>,
    pub refresh_interval: Duration,
    pub is_loading: bool,
    pub is_stale: bool,
}

struct ScheduledTimer {
    id: u64,
    handle: AbortHandle,
}

pub struct DataCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    timers: Arc<DashMap<String, ScheduledTimer>>,
    timer_seq: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> DataCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            timers: Arc::new(DashMap::new()),
            timer_seq: AtomicU64::new(0),
        }
    }

    /// Create (or overwrite) the entry for `key`.
    pub fn initialize(&self, key: &str, refresh_interval: Duration, initial: Option<V>) {
        if self.entries.contains_key(key) {
            tracing::debug!(key, "re-initializing existing cache entry");
        }
        let last_updated = initial.as_ref().map(|_| Instant::now());
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data: initial,
                last_updated,
                refresh_interval,
                is_loading: false,
            },
        );
    }

    /// Store fresh data for `key` and clear its loading flag.
    pub fn set(&self, key: &str, data: V) {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "set on uninitialized cache key, using default interval");
            CacheEntry::empty(DEFAULT_REFRESH_INTERVAL)
        });
        entry.data = Some(data);
        entry.last_updated = Some(Instant::now());
        entry.is_loading = false;
    }

    /// Returns `None` when nothing was ever stored, or when `allow_stale` is
    /// false and the entry has outlived its refresh interval.
    pub fn get(&self, key: &str, allow_stale: bool) -> Option<V> {
        let entry = self.entries.get(key)?;
        if !allow_stale && entry.is_stale() {
            return None;
        }
        entry.data.clone()
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntryView<V>> {
        self.entries.get(key).map(|entry| CacheEntryView {
            data: entry.data.clone(),
            last_updated: entry.last_updated,
            refresh_interval: entry.refresh_interval,
            is_loading: entry.is_loading,
            is_stale: entry.is_stale(),
        })
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.is_stale()).unwrap_or(true)
    }

    pub fn set_loading(&self, key: &str, loading: bool) {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::empty(DEFAULT_REFRESH_INTERVAL));
        entry.is_loading = loading;
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.is_loading).unwrap_or(false)
    }

    /// Atomically claim the loading flag. Returns false if a load for `key`
    /// is already in flight.
    pub fn try_begin_loading(&self, key: &str) -> bool {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::empty(DEFAULT_REFRESH_INTERVAL));
        if entry.is_loading {
            return false;
        }
        entry.is_loading = true;
        true
    }

    pub fn refresh_interval(&self, key: &str) -> Duration {
        self.entries
            .get(key)
            .map(|e| e.refresh_interval)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    /// Arm a one-shot timer that runs `callback` once the key's refresh
    /// interval elapses. Any timer already armed for `key` is aborted.
    pub fn schedule_refresh<F, Fut>(&self, key: &str, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.refresh_interval(key);
        let id = self.timer_seq.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let owned_key = key.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Drop our own registration first so a callback that reschedules
            // the same key does not abort the task it is running on.
            timers.remove_if(&owned_key, |_, timer| timer.id == id);
            callback().await;
        });

        let replaced = self.timers.insert(
            key.to_string(),
            ScheduledTimer {
                id,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
        }
    }

    pub fn has_scheduled_refresh(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn cancel_refresh(&self, key: &str) {
        if let Some((_, timer)) = self.timers.remove(key) {
            timer.handle.abort();
        }
    }

    /// Cancel the key's timer and drop its entry.
    pub fn clear(&self, key: &str) {
        self.cancel_refresh(key);
        self.entries.remove(key);
    }

    pub fn clear_all(&self) {
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for DataCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for DataCache<V> {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.handle.abort();
        }
    }
}
