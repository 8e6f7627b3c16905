//! Fingerprint cache
//!
//! Content-addressed store for finished recognition work (keyed by image
//! fingerprint) and generated answers (keyed by a semantic request key).
//! Entries carry an absolute expiry in Unix milliseconds and are never
//! served at or past it. Expiry is checked on read; the housekeeping task
//! removes stale rows in the background.
//!
//! The primary store is SQLite. When it errors, reads and writes go to the
//! in-process [`MemoryCacheStore`] instead; the request never sees the
//! failure.

pub mod fingerprint;
pub mod memory;
pub mod sqlite;

pub use fingerprint::{fingerprint_image, request_key, FingerprintMode};
pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

use crate::error::PipelineError;
use crate::types::{EnsembleResult, ImageFingerprint, SourceCandidates};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backing store for serialized cache payloads
///
/// `now` and `expires_at` are Unix milliseconds.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Live payload for `key`, `None` when absent or expired
    async fn get(&self, key: &str, now: i64) -> Result<Option<String>>;

    /// Insert or replace
    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()>;

    /// Delete expired entries, returning how many were removed
    async fn sweep(&self, now: i64) -> Result<usize>;
}

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Image(ImageFingerprint),
    /// Digest from [`request_key`]
    Request(String),
}

impl CacheKey {
    fn storage_key(&self) -> String {
        match self {
            CacheKey::Image(fp) => format!("img:{}", fp),
            CacheKey::Request(digest) => format!("req:{}", digest),
        }
    }
}

/// Output of a full recognition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecognition {
    /// Verified and enriched ranking
    pub ensemble: EnsembleResult,
    pub per_source: Vec<SourceCandidates>,
    /// `source_id → reason` for sources that failed on the original run
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedPayload {
    Recognition(CachedRecognition),
    Generated { text: String, provider: String },
}

/// Whether the primary store is currently healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Primary,
    Degraded,
}

/// Process-wide cache with transparent fallback
pub struct FingerprintCache {
    primary: Option<Arc<dyn CacheStore>>,
    fallback: MemoryCacheStore,
    ttl: Duration,
    degraded: AtomicBool,
}

impl FingerprintCache {
    pub fn new(primary: Option<Arc<dyn CacheStore>>, ttl: Duration) -> Self {
        let degraded = primary.is_none();
        Self {
            primary,
            fallback: MemoryCacheStore::new(),
            ttl,
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Cache with only the in-process store
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(None, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn mode(&self) -> CacheMode {
        if self.degraded.load(Ordering::Relaxed) {
            CacheMode::Degraded
        } else {
            CacheMode::Primary
        }
    }

    fn primary_failed(&self, store: &str, err: &anyhow::Error) {
        let failure = PipelineError::CacheUnavailable(format!("{}: {:#}", store, err));
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("{}; falling back to in-process cache", failure);
        } else {
            debug!("{}", failure);
        }
    }

    fn primary_ok(&self, store: &str) {
        if self.primary.is_some() && self.degraded.swap(false, Ordering::Relaxed) {
            info!("Cache store {} recovered", store);
        }
    }

    /// Lookup against the wall clock
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedPayload> {
        self.lookup_at(key, flora_common::time::unix_millis()).await
    }

    /// Lookup as of `now` (Unix millis)
    pub async fn lookup_at(&self, key: &CacheKey, now: i64) -> Option<CachedPayload> {
        let storage_key = key.storage_key();

        if let Some(primary) = &self.primary {
            match primary.get(&storage_key, now).await {
                Ok(Some(raw)) => {
                    self.primary_ok(primary.name());
                    return decode(&storage_key, &raw);
                }
                Ok(None) => self.primary_ok(primary.name()),
                Err(e) => self.primary_failed(primary.name(), &e),
            }
        }

        // Entries written while degraded live only in the fallback
        match self.fallback.get(&storage_key, now).await {
            Ok(Some(raw)) => decode(&storage_key, &raw),
            _ => None,
        }
    }

    /// Store against the wall clock
    pub async fn store(&self, key: &CacheKey, payload: &CachedPayload) {
        self.store_at(key, payload, flora_common::time::unix_millis())
            .await
    }

    /// Store with expiry `now + ttl`; never fails
    pub async fn store_at(&self, key: &CacheKey, payload: &CachedPayload, now: i64) {
        if self.ttl.is_zero() {
            return;
        }
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache payload not serializable: {}", e);
                return;
            }
        };
        let storage_key = key.storage_key();
        let expires_at = now.saturating_add(self.ttl.as_millis() as i64);

        if let Some(primary) = &self.primary {
            match primary.put(&storage_key, &raw, expires_at).await {
                Ok(()) => {
                    self.primary_ok(primary.name());
                    return;
                }
                Err(e) => self.primary_failed(primary.name(), &e),
            }
        }

        if let Err(e) = self.fallback.put(&storage_key, &raw, expires_at).await {
            warn!("In-process cache write failed: {}", e);
        }
    }

    /// Remove expired entries from both stores
    pub async fn sweep(&self) -> usize {
        self.sweep_at(flora_common::time::unix_millis()).await
    }

    pub async fn sweep_at(&self, now: i64) -> usize {
        let mut removed = 0;
        if let Some(primary) = &self.primary {
            match primary.sweep(now).await {
                Ok(n) => removed += n,
                Err(e) => self.primary_failed(primary.name(), &e),
            }
        }
        removed += self.fallback.sweep(now).await.unwrap_or(0);
        removed
    }
}

fn decode(storage_key: &str, raw: &str) -> Option<CachedPayload> {
    match serde_json::from_str(raw) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(key = %storage_key, "Discarding undecodable cache entry: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    fn generated(text: &str) -> CachedPayload {
        CachedPayload::Generated {
            text: text.to_string(),
            provider: "template".to_string(),
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn get(&self, _key: &str, _now: i64) -> Result<Option<String>> {
            anyhow::bail!("database is locked")
        }
        async fn put(&self, _key: &str, _payload: &str, _expires_at: i64) -> Result<()> {
            anyhow::bail!("database is locked")
        }
        async fn sweep(&self, _now: i64) -> Result<usize> {
            anyhow::bail!("database is locked")
        }
    }

    #[tokio::test]
    async fn test_round_trip_until_expiry() {
        let pool = init_memory_pool().await.unwrap();
        let cache = FingerprintCache::new(
            Some(Arc::new(SqliteCacheStore::new(pool))),
            Duration::from_secs(60),
        );
        let key = CacheKey::Request("abc".to_string());
        cache.store_at(&key, &generated("merhaba"), 1_000).await;

        assert_eq!(cache.lookup_at(&key, 60_999).await, Some(generated("merhaba")));
        assert_eq!(cache.lookup_at(&key, 61_000).await, None);
        assert_eq!(cache.mode(), CacheMode::Primary);
    }

    #[tokio::test]
    async fn test_primary_failure_degrades_transparently() {
        let cache = FingerprintCache::new(Some(Arc::new(BrokenStore)), Duration::from_secs(60));
        let key = CacheKey::Image(ImageFingerprint::from_hex("ff00"));
        cache.store_at(&key, &generated("x"), 0).await;

        assert_eq!(cache.mode(), CacheMode::Degraded);
        assert_eq!(cache.lookup_at(&key, 10).await, Some(generated("x")));
        assert_eq!(cache.lookup_at(&key, 60_000).await, None);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_storage() {
        let cache = FingerprintCache::in_memory(Duration::ZERO);
        let key = CacheKey::Request("k".to_string());
        cache.store_at(&key, &generated("x"), 0).await;
        assert_eq!(cache.lookup_at(&key, 0).await, None);
    }

    #[tokio::test]
    async fn test_image_and_request_keys_do_not_collide() {
        let cache = FingerprintCache::in_memory(Duration::from_secs(5));
        cache
            .store_at(&CacheKey::Request("ab".to_string()), &generated("req"), 0)
            .await;
        assert_eq!(
            cache
                .lookup_at(&CacheKey::Image(ImageFingerprint::from_hex("ab")), 1)
                .await,
            None
        );
    }
}
