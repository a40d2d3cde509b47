//! Usage accounting. One immutable row per completed request, written off
//! the response path; the row count is the source of truth for monthly
//! quota enforcement.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::cache::Cache;
use crate::models::usage::{NewUsageRecord, UsageStats};
use crate::rate_limit::month_cache_key;
use crate::store::{RateLimitStore, UsageStore};

#[derive(Clone)]
pub struct UsageLogger {
    store: Arc<dyn UsageStore>,
    cache: Cache,
}

impl UsageLogger {
    pub fn new(store: Arc<dyn UsageStore>, cache: Cache) -> Self {
        UsageLogger { store, cache }
    }

    /// Fire-and-forget write. Errors are logged, never propagated: the
    /// response has already been decided. The month cache entry is dropped
    /// after the insert so the next quota check sees the new count.
    pub fn record(&self, record: NewUsageRecord) {
        let store = self.store.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let api_key_id = record.api_key_id;
            let request_id = record.request_id;
            if let Err(e) = store.insert(record).await {
                tracing::warn!(%request_id, "usage record insert failed: {:#}", e);
                return;
            }
            cache.del(&month_cache_key(api_key_id, Utc::now())).await;
        });
    }

    pub async fn stats(&self, api_key_id: Uuid, since: DateTime<Utc>) -> Result<UsageStats> {
        self.store.stats_since(api_key_id, since).await
    }

    pub async fn month_count(&self, api_key_id: Uuid) -> Result<i64> {
        let (start, next) = crate::rate_limit::month_window(Utc::now());
        self.store.count_between(api_key_id, start, next).await
    }
}

/// Retention pass: drops usage rows and stale durable rate-limit windows
/// past their operator-configured horizons.
pub async fn purge_expired(
    usage: &Arc<dyn UsageStore>,
    rates: &Arc<dyn RateLimitStore>,
    usage_retention_days: i64,
    window_retention_days: i64,
) -> Result<(u64, u64)> {
    let now = Utc::now();
    let usage_purged = usage
        .purge_older_than(now - Duration::days(usage_retention_days))
        .await?;
    let windows_purged = rates
        .purge_older_than(now - Duration::days(window_retention_days))
        .await?;
    if usage_purged > 0 || windows_purged > 0 {
        tracing::info!(usage_purged, windows_purged, "retention purge complete");
    }
    Ok((usage_purged, windows_purged))
}
