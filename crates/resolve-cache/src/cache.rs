//! Resolution cache using moka
//!
//! [`ResolutionCache`] is the seam to the external cache store. Entries carry
//! their own expiry so a reader can tell fresh values from stale ones; the
//! default [`MokaResolutionCache`] retains entries past expiry (up to its
//! retention window) so stale-tolerant recovery has something to serve.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use resolve_core::{CacheKey, TokenId, TokenType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
    /// Lookups that found a fresh entry
    pub hits: u64,
    /// Lookups that found only an expired entry
    pub stale_hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Writes
    pub writes: u64,
}

impl CacheStats {
    /// Fresh hits over all lookups
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.stale_hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Cached resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Resolved value
    pub value: Value,
    /// Type of the token that produced the value
    pub token_type: TokenType,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// End of freshness
    pub expires_at: DateTime<Utc>,
    /// Dependencies of the token at write time
    pub dependencies: Vec<TokenId>,
    /// Similarity score, for values produced by similarity search
    pub similarity_score: Option<f64>,
    /// Whether a fallback path produced the value
    pub fallback_used: bool,
}

impl CacheEntry {
    /// Create entry fresh for `ttl` from now
    #[must_use]
    pub fn new(value: Value, token_type: TokenType, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        Self {
            value,
            token_type,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            dependencies: Vec::new(),
            similarity_score: None,
            fallback_used: false,
        }
    }

    /// With dependencies
    #[inline]
    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<TokenId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// With fallback provenance
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, similarity_score: Option<f64>) -> Self {
        self.fallback_used = true;
        self.similarity_score = similarity_score;
        self
    }

    /// Whether the entry is still fresh at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Age at `now` (zero if the clock went backwards)
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// External cache store contract
///
/// Implementations provide their own internal concurrency safety.
#[async_trait::async_trait]
pub trait ResolutionCache: Send + Sync + Debug {
    /// Entry for a key, fresh or stale
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Store an entry
    async fn set(&self, key: CacheKey, entry: CacheEntry);

    /// Remove an entry
    async fn invalidate(&self, key: &CacheKey);

    /// Statistics snapshot
    fn stats(&self) -> CacheStats;

    /// Entry for a key without touching statistics
    async fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get(key).await
    }

    /// Entry only if still fresh at `now`
    async fn get_fresh(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.get(key).await.filter(|entry| entry.is_fresh(now))
    }
}

/// Default cache backed by `moka`
///
/// Provides:
/// - Automatic eviction based on capacity
/// - Retention of expired entries up to `retention`, for stale reads
/// - Hit / stale-hit / miss counters
#[derive(Debug)]
pub struct MokaResolutionCache {
    inner: Cache<CacheKey, CacheEntry>,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl MokaResolutionCache {
    /// Create cache with max capacity and retention window
    #[must_use]
    pub fn new(max_capacity: u64, retention: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(retention)
                .build(),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate entry count
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl Default for MokaResolutionCache {
    /// 10,000 entries, 24h retention
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}

#[async_trait::async_trait]
impl ResolutionCache for MokaResolutionCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.inner.get(key).await;
        match &entry {
            Some(e) if e.is_fresh(Utc::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) => {
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        tracing::trace!(key = %key.short(), found = entry.is_some(), "cache lookup");
        entry
    }

    async fn set(&self, key: CacheKey, entry: CacheEntry) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.insert(key, entry).await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }

    async fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.get(key).await
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_core::TokenKey;

    fn key(id: &str) -> CacheKey {
        CacheKey::for_key(&TokenKey::new(TokenType::Data, "artifact", "v1", id))
    }

    fn expired(value: &str) -> CacheEntry {
        let mut entry = CacheEntry::new(Value::from(value), TokenType::Data, Duration::from_secs(60));
        entry.created_at = Utc::now() - ChronoDuration::hours(2);
        entry.expires_at = Utc::now() - ChronoDuration::hours(1);
        entry
    }

    #[tokio::test]
    async fn cache_set_and_get() {
        let cache = MokaResolutionCache::new(100, Duration::from_secs(3600));
        let entry = CacheEntry::new(Value::from("42"), TokenType::Data, Duration::from_secs(60));

        cache.set(key("req"), entry.clone()).await;

        let retrieved = cache.get(&key("req")).await;
        assert_eq!(retrieved, Some(entry));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn cache_returns_none_for_missing() {
        let cache = MokaResolutionCache::default();
        assert!(cache.get(&key("missing")).await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_remain_readable_as_stale() {
        let cache = MokaResolutionCache::default();
        cache.set(key("old"), expired("stale")).await;

        let now = Utc::now();
        assert!(cache.get_fresh(&key("old"), now).await.is_none());

        let stale = cache.get(&key("old")).await.unwrap();
        assert!(!stale.is_fresh(now));
        assert!(stale.age(now) >= Duration::from_secs(3600));
        assert_eq!(cache.stats().stale_hits, 2);
    }

    #[tokio::test]
    async fn peek_does_not_count() {
        let cache = MokaResolutionCache::default();
        cache.set(key("p"), expired("v")).await;
        assert!(cache.peek(&key("p")).await.is_some());
        assert!(cache.peek(&key("q")).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.stale_hits + stats.misses, 0);
    }

    #[tokio::test]
    async fn cache_invalidation() {
        let cache = MokaResolutionCache::default();
        let entry = CacheEntry::new(Value::from(1), TokenType::Metrics, Duration::from_secs(60));
        cache.set(key("x"), entry).await;
        assert!(cache.get(&key("x")).await.is_some());

        cache.invalidate(&key("x")).await;
        assert!(cache.get(&key("x")).await.is_none());
    }

    #[tokio::test]
    async fn cache_stats_entry_count() {
        let cache = MokaResolutionCache::new(100, Duration::from_secs(60));
        for i in 0..5 {
            let entry = CacheEntry::new(Value::from(i), TokenType::Data, Duration::from_secs(60));
            cache.set(key(&format!("k{i}")), entry).await;
        }
        cache.sync().await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 5);
        assert_eq!(stats.writes, 5);
    }

    #[test]
    fn hit_rate_counts_only_fresh_hits() {
        let stats = CacheStats {
            hits: 3,
            stale_hits: 1,
            misses: 4,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.375).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
