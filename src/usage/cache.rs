//! Fast atomic-counter store for window usage.
//!
//! The trait is the seam between the accounting service and whatever
//! low-latency store a deployment uses. The contract that matters is
//! atomicity: `increment` must execute its read-modify-write as one
//! indivisible operation, because many concurrent completions target the same
//! hot model keys. The bundled in-memory implementation holds a single lock
//! across the whole update; a remote implementation must use a server-side
//! primitive (e.g. a script), never two round trips.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::quota::TokenUsage;

/// Fast-store failures. Always caught at the accounting boundary and
/// downgraded to fail-open behavior; never surfaced to request callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("usage cache unavailable: {0}")]
    Unavailable(String),
}

/// One window bucket's accumulated usage, as stored in the fast store.
///
/// Serialized as JSON when the store is remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
    /// Bucket start (epoch secs). Identifies which window the counters
    /// belong to; a key surviving past its bucket boundary is reset rather
    /// than accumulated into.
    pub window_start: i64,
    /// Last write (epoch secs).
    pub last_updated: i64,
}

/// The fast store: TTL-capable keyed counters with atomic increments.
#[async_trait]
pub trait UsageCache: Send + Sync {
    /// Read a bucket. A missing (or expired) key is `Ok(None)` - zero usage,
    /// not an error.
    async fn get(&self, key: &str) -> Result<Option<WindowUsage>, CacheError>;

    /// Atomically add `delta` to the bucket for `window_start`, refreshing
    /// the TTL, and return the updated value.
    ///
    /// If the stored bucket belongs to an earlier window (the key outlived
    /// its boundary thanks to the TTL grace), the counters restart from
    /// `delta`. The whole read-modify-write is one indivisible operation.
    async fn increment(
        &self,
        key: &str,
        delta: &TokenUsage,
        window_start: i64,
        ttl: Duration,
    ) -> Result<WindowUsage, CacheError>;
}

struct CacheEntry {
    usage: WindowUsage,
    expires_at: Instant,
}

/// In-memory `UsageCache` for single-process deployments and tests.
///
/// One mutex over the map makes every increment atomic; entries self-expire
/// lazily on access.
#[derive(Default)]
pub struct MemoryUsageCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryUsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Intended for diagnostics.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl UsageCache for MemoryUsageCache {
    async fn get(&self, key: &str) -> Result<Option<WindowUsage>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.usage.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn increment(
        &self,
        key: &str,
        delta: &TokenUsage,
        window_start: i64,
        ttl: Duration,
    ) -> Result<WindowUsage, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
            usage: WindowUsage {
                window_start,
                ..WindowUsage::default()
            },
            expires_at: now + ttl,
        });

        // Expired or rolled-over buckets restart from zero.
        if entry.expires_at <= now || entry.usage.window_start != window_start {
            entry.usage = WindowUsage {
                window_start,
                ..WindowUsage::default()
            };
        }

        entry.usage.prompt_tokens += delta.prompt_tokens;
        entry.usage.completion_tokens += delta.completion_tokens;
        entry.usage.total_tokens += delta.total_tokens;
        entry.usage.request_count += 1;
        entry.usage.last_updated = Utc::now().timestamp();
        entry.expires_at = now + ttl;

        Ok(entry.usage.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage::new(prompt, completion)
    }

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let cache = MemoryUsageCache::new();
        assert_eq!(cache.get("usage:p1:gpt-4:minute").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let cache = MemoryUsageCache::new();
        let ttl = Duration::from_secs(120);

        cache
            .increment("k", &delta(10, 20), 1000, ttl)
            .await
            .unwrap();
        let updated = cache
            .increment("k", &delta(1, 2), 1000, ttl)
            .await
            .unwrap();

        assert_eq!(updated.prompt_tokens, 11);
        assert_eq!(updated.completion_tokens, 22);
        assert_eq!(updated.total_tokens, 33);
        assert_eq!(updated.request_count, 2);
        assert_eq!(updated.window_start, 1000);
    }

    #[tokio::test]
    async fn test_increment_resets_on_window_rollover() {
        let cache = MemoryUsageCache::new();
        let ttl = Duration::from_secs(120);

        cache
            .increment("k", &delta(10, 10), 1000, ttl)
            .await
            .unwrap();
        // Same key, next bucket: the carried-over counters must not leak in.
        let updated = cache
            .increment("k", &delta(5, 5), 1060, ttl)
            .await
            .unwrap();

        assert_eq!(updated.total_tokens, 10);
        assert_eq!(updated.request_count, 1);
        assert_eq!(updated.window_start, 1060);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = MemoryUsageCache::new();
        cache
            .increment("k", &delta(10, 10), 1000, Duration::from_secs(120))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(121)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_refreshes_ttl() {
        let cache = MemoryUsageCache::new();
        let ttl = Duration::from_secs(120);

        cache.increment("k", &delta(1, 1), 1000, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        cache.increment("k", &delta(1, 1), 1000, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;

        // 200s since first write, but only 100s since the refresh.
        let usage = cache.get("k").await.unwrap().unwrap();
        assert_eq!(usage.request_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_no_updates() {
        use std::sync::Arc;

        let cache = Arc::new(MemoryUsageCache::new());
        let ttl = Duration::from_secs(120);

        let mut handles = Vec::new();
        for _ in 0..64 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache
                    .increment("hot-key", &TokenUsage::new(3, 7), 1000, ttl)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let usage = cache.get("hot-key").await.unwrap().unwrap();
        assert_eq!(usage.total_tokens, 64 * 10);
        assert_eq!(usage.request_count, 64);
    }

    #[tokio::test]
    async fn test_window_usage_json_shape() {
        let usage = WindowUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            request_count: 1,
            window_start: 1000,
            last_updated: 1010,
        };
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["prompt_tokens"], 1);
        assert_eq!(json["window_start"], 1000);
    }
}
