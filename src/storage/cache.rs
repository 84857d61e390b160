//! Bounded, TTL-aware cache of decrypted data keys.
//!
//! Entries are indexed by a fingerprint of the *encrypted* data key, so the
//! plaintext never doubles as a lookup key. A single reader/writer lock
//! guards both the entry table and the last-sweep timestamp.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

/// Default maximum number of cached keys.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10_000;
/// Default number of keys evicted when the cache is full.
pub const DEFAULT_EVICT_BATCH_SIZE: usize = 1_000;
/// Minimum time between two full expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Upper bound for entry lifetimes whose deadline would overflow the clock.
const MAX_ENTRY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// One-way fingerprint of an encrypted data key: SHA-256, base64url.
#[must_use]
pub fn fingerprint(encrypted_key: &[u8]) -> String {
    URL_SAFE.encode(Sha256::digest(encrypted_key))
}

/// Key cache sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCacheConfig {
    /// Entry count at which an insert first evicts a batch.
    pub max_size: usize,
    /// Entries removed per eviction, soonest expiry first.
    pub evict_batch_size: usize,
    /// Minimum time between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_CACHE_SIZE,
            evict_batch_size: DEFAULT_EVICT_BATCH_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl KeyCacheConfig {
    /// Set the maximum size; zero keeps the default.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        if max_size > 0 {
            self.max_size = max_size;
        }
        self
    }

    /// Set the eviction batch size; zero keeps the default.
    #[must_use]
    pub fn with_evict_batch_size(mut self, evict_batch_size: usize) -> Self {
        if evict_batch_size > 0 {
            self.evict_batch_size = evict_batch_size;
        }
        self
    }

    #[must_use]
    pub const fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

struct CacheEntry {
    key: Zeroizing<Vec<u8>>,
    expires_at: Instant,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    last_swept: Instant,
}

/// Fingerprint → plaintext data key, with expiry and size bounds.
///
/// Operations never fail; a miss is an ordinary `None`.
pub struct KeyCache {
    config: KeyCacheConfig,
    state: RwLock<CacheState>,
}

impl KeyCache {
    #[must_use]
    pub fn new(config: KeyCacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                last_swept: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &KeyCacheConfig {
        &self.config
    }

    /// Return the cached key for `fingerprint`, if present and unexpired.
    ///
    /// Expired entries are reported as absent but left for the sweep.
    pub async fn lookup(&self, fingerprint: &str) -> Option<Zeroizing<Vec<u8>>> {
        let state = self.state.read().await;
        let now = Instant::now();
        state
            .entries
            .get(fingerprint)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.key.clone())
    }

    /// Store `key` for `ttl`, evicting a batch first when at capacity.
    ///
    /// Returns the number of entries evicted to make room.
    pub async fn insert(&self, fingerprint: String, key: Zeroizing<Vec<u8>>, ttl: Duration) -> usize {
        let mut state = self.state.write().await;

        // Replacing an entry does not grow the table
        let evicted = if state.entries.len() >= self.config.max_size
            && !state.entries.contains_key(&fingerprint)
        {
            evict_soonest(&mut state.entries, self.config.evict_batch_size)
        } else {
            0
        };

        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + MAX_ENTRY_TTL);
        state.entries.insert(fingerprint, CacheEntry { key, expires_at });

        if evicted > 0 {
            debug!(evicted, size = state.entries.len(), "Key cache at capacity, evicted batch");
        }
        evicted
    }

    /// Remove every expired entry, at most once per sweep interval.
    ///
    /// Returns the number of entries removed; zero when the sweep was skipped.
    pub async fn sweep_expired(&self) -> usize {
        let interval = self.config.sweep_interval;

        let last_swept = self.state.read().await.last_swept;
        if last_swept.elapsed() <= interval {
            return 0;
        }

        let mut state = self.state.write().await;
        // Another caller may have swept while we waited for the lock
        if state.last_swept.elapsed() <= interval {
            return 0;
        }

        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.last_swept = now;

        let removed = before - state.entries.len();
        debug!(removed, size = state.entries.len(), "Swept expired data keys");
        removed
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.state.write().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(KeyCacheConfig::default())
    }
}

/// Remove up to `count` entries with the earliest expiry.
fn evict_soonest(entries: &mut HashMap<String, CacheEntry>, count: usize) -> usize {
    let mut by_expiry: Vec<(Instant, String)> = entries
        .iter()
        .map(|(fingerprint, entry)| (entry.expires_at, fingerprint.clone()))
        .collect();

    let count = count.min(by_expiry.len());
    if count == 0 {
        return 0;
    }
    if count < by_expiry.len() {
        by_expiry.select_nth_unstable_by_key(count - 1, |(expires_at, _)| *expires_at);
    }

    for (_, fingerprint) in by_expiry.into_iter().take(count) {
        entries.remove(&fingerprint);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn key(byte: u8) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![byte; 32])
    }

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let a = fingerprint(b"ciphertext");
        assert_eq!(a, fingerprint(b"ciphertext"));
        assert_ne!(a, fingerprint(b"ciphertext2"));
        assert!(!a.contains("ciphertext"));
        // 32 digest bytes, padded base64
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_zero_sizes_keep_defaults() {
        let config = KeyCacheConfig::default()
            .with_max_size(0)
            .with_evict_batch_size(0);
        assert_eq!(config.max_size, DEFAULT_MAX_CACHE_SIZE);
        assert_eq!(config.evict_batch_size, DEFAULT_EVICT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let cache = KeyCache::default();
        assert!(cache.lookup("fp").await.is_none());

        cache.insert("fp".to_string(), key(1), HOUR).await;

        assert_eq!(cache.lookup("fp").await.unwrap().as_slice(), &[1u8; 32]);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_evicts_soonest_expiry_batch() {
        let cache = KeyCache::new(
            KeyCacheConfig::default()
                .with_max_size(3)
                .with_evict_batch_size(2),
        );

        cache.insert("1h".to_string(), key(1), HOUR).await;
        cache.insert("2h".to_string(), key(2), 2 * HOUR).await;
        cache.insert("3h".to_string(), key(3), 3 * HOUR).await;
        let evicted = cache.insert("new".to_string(), key(4), HOUR / 2).await;

        assert_eq!(evicted, 2);
        assert_eq!(cache.len().await, 2);
        assert!(cache.lookup("1h").await.is_none());
        assert!(cache.lookup("2h").await.is_none());
        assert!(cache.lookup("3h").await.is_some());
        assert!(cache.lookup("new").await.is_some());
    }

    #[tokio::test]
    async fn test_batch_larger_than_cache() {
        let cache = KeyCache::new(
            KeyCacheConfig::default()
                .with_max_size(2)
                .with_evict_batch_size(10),
        );

        cache.insert("a".to_string(), key(1), HOUR).await;
        cache.insert("b".to_string(), key(2), HOUR).await;
        let evicted = cache.insert("c".to_string(), key(3), HOUR).await;

        assert_eq!(evicted, 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reads_as_absent() {
        let cache = KeyCache::default();
        cache.insert("fp".to_string(), key(1), Duration::from_secs(60)).await;

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cache.lookup("fp").await.is_none());
        // still resident until a sweep runs
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_is_rate_limited() {
        let cache = KeyCache::default();
        cache.insert("short".to_string(), key(1), Duration::from_secs(60)).await;
        cache.insert("long".to_string(), key(2), 2 * HOUR).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        // interval since construction has not elapsed yet
        assert_eq!(cache.sweep_expired().await, 0);
        assert_eq!(cache.len().await, 2);

        tokio::time::advance(DEFAULT_SWEEP_INTERVAL).await;
        assert_eq!(cache.sweep_expired().await, 1);
        assert!(cache.lookup("long").await.is_some());

        // immediately after a sweep, the next one is skipped
        cache.insert("gone".to_string(), key(3), Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep_expired().await, 0);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = KeyCache::default();
        cache.insert("a".to_string(), key(1), HOUR).await;
        cache.insert("b".to_string(), key(2), HOUR).await;

        cache.clear().await;

        assert!(cache.is_empty().await);
        assert!(cache.lookup("a").await.is_none());
    }

    #[tokio::test]
    async fn test_replace_at_capacity_keeps_others() {
        let cache = KeyCache::new(KeyCacheConfig::default().with_max_size(2).with_evict_batch_size(1));
        cache.insert("a".to_string(), key(1), HOUR).await;
        cache.insert("b".to_string(), key(2), 2 * HOUR).await;

        let evicted = cache.insert("a".to_string(), key(1), 3 * HOUR).await;

        assert_eq!(evicted, 0);
        assert_eq!(cache.len().await, 2);
        assert!(cache.lookup("b").await.is_some());
    }
}
