//! Cache layer for the admission pipeline.
//!
//! The backing store is behind the [`CacheStore`] trait (Redis in
//! production, an in-memory map for tests and cache-less deployments).
//! [`Cache`] wraps a store and degrades every backend failure to a safe
//! default: the cache is an optimization, never a correctness dependency
//! for data that has a source of truth in Postgres.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Raw backend primitives. Implementations report failures; the degrading
/// policy lives in [`Cache`], not here.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Best-effort glob delete. Only safe at the key cardinality this
    /// system expects; not a SCAN replacement.
    async fn del_pattern(&self, pattern: &str) -> Result<u64>;
    /// Atomic increment, creating the counter at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;
    /// Remaining TTL in seconds, or a negative value if the key has none.
    async fn ttl(&self, key: &str) -> Result<i64>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Cache { store }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, "cache get failed, treating as miss: {:#}", e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) {
        if let Err(e) = self.store.set(key, value, ttl_seconds).await {
            tracing::warn!(key, "cache set failed, skipping: {:#}", e);
        }
    }

    pub async fn del(&self, key: &str) {
        if let Err(e) = self.store.del(key).await {
            tracing::warn!(key, "cache del failed, skipping: {:#}", e);
        }
    }

    pub async fn del_pattern(&self, pattern: &str) {
        if let Err(e) = self.store.del_pattern(pattern).await {
            tracing::warn!(pattern, "cache pattern delete failed, skipping: {:#}", e);
        }
    }

    /// Atomic increment. Returns 0 when the backend is unreachable; real
    /// counters start at 1, so callers use 0 as the unavailability signal.
    pub async fn incr(&self, key: &str) -> i64 {
        match self.store.incr(key).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(key, "cache incr failed: {:#}", e);
                0
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) {
        if let Err(e) = self.store.expire(key, ttl_seconds).await {
            tracing::warn!(key, "cache expire failed, skipping: {:#}", e);
        }
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        match self.store.ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::warn!(key, "cache ttl failed: {:#}", e);
                -1
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "cache entry failed to deserialize, dropping: {}", e);
                self.del(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl_seconds).await,
            Err(e) => tracing::warn!(key, "cache value failed to serialize: {}", e),
        }
    }

    /// Cache-aside helper. Returns `(value, was_cached)`. A supplier error
    /// propagates; cache failures on either side never do.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        supplier: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_json::<T>(key).await {
            return Ok((cached, true));
        }
        let fresh = supplier().await?;
        self.set_json(key, &fresh, ttl_seconds).await;
        Ok((fresh, false))
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

/// Joins non-empty parts with `:`, the fixed key delimiter.
pub fn cache_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(":")
}

/// Canonical short digest of an option bag: keys sorted, null entries
/// dropped, SHA-256 truncated to 16 hex chars. Differently-ordered but
/// equivalent bags hash identically.
pub fn hash_params(params: &serde_json::Value) -> String {
    let mut entries: Vec<(String, String)> = match params.as_object() {
        Some(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect(),
        None => vec![("_".to_string(), params.to_string())],
    };
    entries.sort();

    let canonical = entries
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_skips_empty_parts() {
        assert_eq!(cache_key(&["apikey", "wk_abc123"]), "apikey:wk_abc123");
        assert_eq!(cache_key(&["rl", "", "minute"]), "rl:minute");
    }

    #[test]
    fn hash_params_is_order_independent() {
        let a = hash_params(&json!({"a": 1, "b": 2}));
        let b = hash_params(&json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn hash_params_distinguishes_values_and_drops_nulls() {
        let base = hash_params(&json!({"a": 1, "b": 2}));
        assert_ne!(base, hash_params(&json!({"a": 1, "b": 3})));
        assert_eq!(base, hash_params(&json!({"a": 1, "b": 2, "c": null})));
    }
}
