//! Bounded LRU cache of image URL handles.
//!
//! ```text
//!  get_image_url(id)
//!        |
//!        +-- cached ----------------> promote, return handle
//!        +-- failed before ---------> None (negative cache)
//!        +-- fetch in flight -------> poll until cached/failed/timeout
//!        +-- otherwise -------------> mark in flight, fetch blob on a spawned
//!                                     task, cache handle (evicting LRU) or
//!                                     mark failed
//! ```
//!
//! Evicted and cleared entries have their handle revoked through the
//! [`ObjectUrlFactory`]. A waiter that times out gets `None`; the fetch it
//! was waiting on still completes and fills the cache for later callers.
//! The same holds when the caller that started the fetch is dropped.
//! The failed set lasts until [`ImageCache::clear`] or
//! [`ImageCache::remove`].

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::blob::{BlobStore, ObjectUrlFactory};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheConfig {
    /// Maximum number of cached handles (minimum 1).
    pub max_cache_size: usize,
    /// How long a caller waits on another caller's in-flight fetch.
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl ImageCacheConfig {
    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Lookups answered by the failed set.
    pub negative_hits: u64,
    /// Waits on an in-flight fetch that gave up.
    pub timeouts: u64,
    pub failed: usize,
    pub in_flight: usize,
    pub size: usize,
    pub capacity: usize,
}

impl ImageCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// ImageCache
// ============================================================================

struct Inner {
    entries: LruCache<String, String>,
    in_flight: HashSet<String>,
    failed: HashSet<String>,
    stats: ImageCacheStats,
}

pub struct ImageCache {
    blobs: Arc<dyn BlobStore>,
    urls: Arc<dyn ObjectUrlFactory>,
    config: ImageCacheConfig,
    inner: Arc<Mutex<Inner>>,
}

impl ImageCache {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        urls: Arc<dyn ObjectUrlFactory>,
        config: ImageCacheConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.max_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            blobs,
            urls,
            config,
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashSet::new(),
                failed: HashSet::new(),
                stats: ImageCacheStats::default(),
            })),
        }
    }

    pub fn config(&self) -> &ImageCacheConfig {
        &self.config
    }

    /// Resolve a card's image handle, fetching its blob on a miss.
    pub async fn get_image_url(&self, card_id: &str) -> Option<String> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(url) = inner.entries.get(card_id).cloned() {
                inner.stats.hits += 1;
                return Some(url);
            }
            if inner.failed.contains(card_id) {
                inner.stats.negative_hits += 1;
                return None;
            }
            if inner.in_flight.contains(card_id) {
                drop(inner);
                return self.wait_for(card_id).await;
            }
            inner.stats.misses += 1;
            inner.in_flight.insert(card_id.to_string());
        }

        // Detached so the in-flight marker is settled even if this caller
        // is cancelled mid-fetch.
        let fetch = tokio::spawn(fetch_and_fill(
            self.blobs.clone(),
            self.urls.clone(),
            self.inner.clone(),
            card_id.to_string(),
        ));
        match fetch.await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Image fetch task for card {} failed: {}", card_id, e);
                self.inner.lock().await.in_flight.remove(card_id);
                None
            }
        }
    }

    async fn wait_for(&self, card_id: &str) -> Option<String> {
        let poll = async {
            loop {
                tokio::time::sleep(self.config.poll_interval).await;
                let mut inner = self.inner.lock().await;
                if let Some(url) = inner.entries.get(card_id).cloned() {
                    inner.stats.hits += 1;
                    return Some(url);
                }
                if inner.failed.contains(card_id) || !inner.in_flight.contains(card_id) {
                    return None;
                }
            }
        };

        match tokio::time::timeout(self.config.wait_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                log::debug!("Gave up waiting for in-flight image of card {}", card_id);
                self.inner.lock().await.stats.timeouts += 1;
                None
            }
        }
    }

    /// Fetch a batch of ids ahead of use. Returns how many resolved.
    pub async fn prewarm<I, S>(&self, card_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = 0;
        for id in card_ids {
            if self.get_image_url(id.as_ref()).await.is_some() {
                loaded += 1;
            }
        }
        loaded
    }

    /// Drop one entry, revoking its handle and forgetting any failure.
    pub async fn remove(&self, card_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.failed.remove(card_id);
        match inner.entries.pop(card_id) {
            Some(url) => {
                self.urls.revoke_url(&url);
                true
            }
            None => false,
        }
    }

    /// Revoke every handle and forget every failure.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        for (_, url) in inner.entries.iter() {
            self.urls.revoke_url(url);
        }
        let released = inner.entries.len();
        inner.entries.clear();
        inner.failed.clear();
        log::debug!("Image cache cleared, {} handle(s) released", released);
    }

    pub async fn contains(&self, card_id: &str) -> bool {
        self.inner.lock().await.entries.contains(card_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached ids, most recently used first.
    pub async fn lru_order(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn stats(&self) -> ImageCacheStats {
        let inner = self.inner.lock().await;
        ImageCacheStats {
            failed: inner.failed.len(),
            in_flight: inner.in_flight.len(),
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            ..inner.stats.clone()
        }
    }
}

// ============================================================================
// Fetch
// ============================================================================

/// Fetch one blob, then cache its handle or record the failure.
async fn fetch_and_fill(
    blobs: Arc<dyn BlobStore>,
    urls: Arc<dyn ObjectUrlFactory>,
    inner: Arc<Mutex<Inner>>,
    card_id: String,
) -> Option<String> {
    let fetched = blobs.get(&card_id).await;

    let mut inner = inner.lock().await;
    inner.in_flight.remove(&card_id);
    match fetched {
        Ok(Some(record)) => {
            let url = urls.create_url(&record);
            insert_entry(&mut inner, urls.as_ref(), &card_id, url.clone());
            Some(url)
        }
        Ok(None) => {
            log::debug!("No image blob for card {}", card_id);
            inner.failed.insert(card_id);
            None
        }
        Err(e) => {
            log::warn!("Image fetch for card {} failed: {}", card_id, e);
            inner.failed.insert(card_id);
            None
        }
    }
}

fn insert_entry(inner: &mut Inner, urls: &dyn ObjectUrlFactory, card_id: &str, url: String) {
    if let Some((old_key, old_url)) = inner.entries.push(card_id.to_string(), url) {
        urls.revoke_url(&old_url);
        if old_key != card_id {
            inner.stats.evictions += 1;
            log::debug!("Evicted image handle for card {}", old_key);
        }
    }
}
