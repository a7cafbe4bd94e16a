//! Response cache
//!
//! Fingerprint-keyed cache over normalized responses with three modes:
//! disabled, simple (exact fingerprint), and semantic (embedding bucket).
//! Concurrent misses for one fingerprint collapse onto a single upstream
//! call; the leader writes the entry before releasing the waiters, and a
//! cancelled leader promotes one waiter.

mod fingerprint;

pub use fingerprint::{cosine_similarity, fingerprint, semantic_fingerprint};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::core::types::{CacheMode, CacheSettings};

const MAX_ENTRIES: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// One cached normalized response
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// Normalized response body as returned to the client
    pub body: Value,
    pub status: u16,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(body: Value, status: u16, ttl: Option<Duration>) -> Self {
        Self {
            body,
            status,
            created_at: Utc::now(),
            ttl: ttl.unwrap_or(DEFAULT_TTL),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }
}

/// Per-entry TTL policy for the moka store
struct EntryTtl;

impl moka::Expiry<String, CachedEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CachedEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Outcome of a cache probe
pub enum CacheLookup {
    /// Valid entry found
    Hit(CachedEntry),
    /// No entry; the caller is the flight leader and must complete or
    /// drop the guard
    Miss(FlightGuard),
}

/// Single-flight leadership over one fingerprint
///
/// Holding the guard marks the fingerprint as in flight. `complete`
/// writes the entry before waiters are released; dropping without
/// completing releases the waiters so one can take over.
pub struct FlightGuard {
    key: String,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _permit: OwnedMutexGuard<()>,
}

impl FlightGuard {
    /// Key the guard owns
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

/// Fingerprint-keyed response cache with single-flight coalescing
pub struct ResponseCache {
    store: moka::future::Cache<String, CachedEntry>,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// Semantic bucket centroids; the index is the bucket id
    buckets: RwLock<Vec<Vec<f32>>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            store: moka::future::Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(EntryTtl)
                .build(),
            inflight: Arc::new(DashMap::new()),
            buckets: RwLock::new(Vec::new()),
        }
    }

    /// Cache key for a request under the given settings
    ///
    /// `None` means the cache does not apply (disabled mode). Semantic
    /// mode without an embedding degrades to the exact fingerprint.
    pub fn key_for(
        &self,
        settings: &CacheSettings,
        provider: &str,
        model: &str,
        function: &str,
        body: &Value,
        strict: bool,
        embedding: Option<&[f32]>,
    ) -> Option<String> {
        match settings.mode {
            CacheMode::Disabled => None,
            CacheMode::Simple => Some(fingerprint(provider, model, function, body, strict)),
            CacheMode::Semantic => match embedding {
                Some(embedding) => {
                    let bucket = self.assign_bucket(embedding, settings.similarity_threshold);
                    Some(semantic_fingerprint(provider, model, function, bucket, strict))
                }
                None => Some(fingerprint(provider, model, function, body, strict)),
            },
        }
    }

    /// Probe the cache; on miss the caller becomes the flight leader
    ///
    /// Waiters block until the leader completes (then observe the entry)
    /// or drops (then one is promoted to leader).
    pub async fn begin(&self, key: &str, settings: &CacheSettings) -> CacheLookup {
        loop {
            if let Some(entry) = self.store.get(key).await {
                if self.entry_valid(&entry, settings) {
                    debug!(key, "cache hit");
                    return CacheLookup::Hit(entry);
                }
                self.store.invalidate(key).await;
            }

            match self.inflight.entry(key.to_string()) {
                Entry::Vacant(vacant) => {
                    let marker = Arc::new(Mutex::new(()));
                    // Fresh mutex: the owned lock is always available
                    let Ok(permit) = marker.clone().try_lock_owned() else {
                        continue;
                    };
                    vacant.insert(marker);
                    return CacheLookup::Miss(FlightGuard {
                        key: key.to_string(),
                        inflight: self.inflight.clone(),
                        _permit: permit,
                    });
                }
                Entry::Occupied(occupied) => {
                    let marker = occupied.get().clone();
                    drop(occupied);
                    // Wait for the leader to finish (or vanish), then re-probe
                    let _ = marker.lock().await;
                }
            }
        }
    }

    /// Write the entry and release the flight
    pub async fn complete(&self, guard: FlightGuard, entry: CachedEntry) {
        self.store.insert(guard.key.clone(), entry).await;
        drop(guard);
    }

    /// Write an entry outside a flight (force-refresh path)
    pub async fn insert(&self, key: &str, entry: CachedEntry) {
        self.store.insert(key.to_string(), entry).await;
    }

    fn entry_valid(&self, entry: &CachedEntry, settings: &CacheSettings) -> bool {
        if let Some(max_age) = settings.max_age_secs {
            if entry.age() > Duration::from_secs(max_age) {
                return false;
            }
        }
        entry.age() <= entry.ttl
    }

    /// Bucket id for an embedding: the first centroid at or above the
    /// similarity threshold, or a new bucket seeded with this embedding
    fn assign_bucket(&self, embedding: &[f32], threshold: f32) -> u64 {
        {
            let buckets = self.buckets.read();
            let mut best: Option<(usize, f32)> = None;
            for (index, centroid) in buckets.iter().enumerate() {
                let similarity = cosine_similarity(centroid, embedding);
                if similarity >= threshold
                    && best.map(|(_, s)| similarity > s).unwrap_or(true)
                {
                    best = Some((index, similarity));
                }
            }
            if let Some((index, _)) = best {
                return index as u64;
            }
        }

        let mut buckets = self.buckets.write();
        // Re-check under the write lock: another request may have seeded
        // a matching bucket meanwhile
        for (index, centroid) in buckets.iter().enumerate() {
            if cosine_similarity(centroid, embedding) >= threshold {
                return index as u64;
            }
        }
        buckets.push(embedding.to_vec());
        (buckets.len() - 1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(mode: CacheMode) -> CacheSettings {
        CacheSettings {
            mode,
            ttl_secs: Some(60),
            max_age_secs: None,
            similarity_threshold: 0.95,
        }
    }

    #[tokio::test]
    async fn leader_write_is_observed_by_waiters() {
        let cache = Arc::new(ResponseCache::new());
        let settings = settings(CacheMode::Simple);
        let upstream_calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let settings = settings.clone();
            let upstream_calls = upstream_calls.clone();
            handles.push(tokio::spawn(async move {
                match cache.begin("fp-1", &settings).await {
                    CacheLookup::Hit(entry) => entry.body,
                    CacheLookup::Miss(guard) => {
                        upstream_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        let entry = CachedEntry::new(json!({"answer": 42}), 200, None);
                        let body = entry.body.clone();
                        cache.complete(guard, entry).await;
                        body
                    }
                }
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), json!({"answer": 42}));
        }
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_leader_promotes_a_waiter() {
        let cache = Arc::new(ResponseCache::new());
        let settings = settings(CacheMode::Simple);

        let leader = match cache.begin("fp-2", &settings).await {
            CacheLookup::Miss(guard) => guard,
            CacheLookup::Hit(_) => panic!("fresh cache cannot hit"),
        };

        let waiter = {
            let cache = cache.clone();
            let settings = settings.clone();
            tokio::spawn(async move { cache.begin("fp-2", &settings).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(leader);

        match waiter.await.unwrap() {
            CacheLookup::Miss(_) => {}
            CacheLookup::Hit(_) => panic!("no entry was written"),
        }
    }

    #[tokio::test]
    async fn semantic_keys_collapse_near_duplicates() {
        let cache = ResponseCache::new();
        let settings = settings(CacheMode::Semantic);
        let body_a = json!({"messages": [{"role": "user", "content": "what is rust"}]});
        let body_b = json!({"messages": [{"role": "user", "content": "what's rust?"}]});

        // cosine of these two is ~0.98
        let embed_a = vec![1.0f32, 0.0, 0.1];
        let embed_b = vec![0.98f32, 0.05, 0.12];
        assert!(cosine_similarity(&embed_a, &embed_b) > 0.95);

        let key_a = cache
            .key_for(&settings, "openai", "m", "CHAT_COMPLETE", &body_a, false, Some(&embed_a))
            .unwrap();
        let key_b = cache
            .key_for(&settings, "openai", "m", "CHAT_COMPLETE", &body_b, false, Some(&embed_b))
            .unwrap();
        assert_eq!(key_a, key_b);

        // An orthogonal embedding lands in a fresh bucket
        let key_c = cache
            .key_for(
                &settings,
                "openai",
                "m",
                "CHAT_COMPLETE",
                &body_a,
                false,
                Some(&[0.0f32, 1.0, 0.0]),
            )
            .unwrap();
        assert_ne!(key_a, key_c);
    }

    #[tokio::test]
    async fn disabled_mode_yields_no_key() {
        let cache = ResponseCache::new();
        assert!(
            cache
                .key_for(
                    &settings(CacheMode::Disabled),
                    "openai",
                    "m",
                    "CHAT_COMPLETE",
                    &json!({}),
                    false,
                    None
                )
                .is_none()
        );
    }

    #[tokio::test]
    async fn max_age_rejects_old_entries() {
        let cache = ResponseCache::new();
        let mut settings = settings(CacheMode::Simple);
        settings.max_age_secs = Some(0);

        let entry = CachedEntry::new(json!({"x": 1}), 200, Some(Duration::from_secs(60)));
        cache.insert("fp-3", entry).await;
        // age > 0s as soon as the clock ticks; force it stale
        tokio::time::sleep(Duration::from_millis(1100)).await;
        match cache.begin("fp-3", &settings).await {
            CacheLookup::Miss(_) => {}
            CacheLookup::Hit(_) => panic!("stale entry served"),
        }
    }
}
