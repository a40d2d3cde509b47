//! Tiered rate limiting: a fixed per-minute window on the cache fast path,
//! a durable database window when the cache is unreachable, and a monthly
//! cap counted from the usage ledger.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::{cache_key, Cache};
use crate::models::api_key::KeyIdentity;
use crate::models::subscription::TierLimits;
use crate::store::{RateLimitStore, UsageStore};

const MINUTE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    PerMinute,
    Monthly,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::PerMinute => "per_minute",
            LimitType::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
    pub limit_type: LimitType,
}

impl RateLimitDecision {
    fn from_count(count: i64, limit: i64, reset_at: DateTime<Utc>, limit_type: LimitType) -> Self {
        RateLimitDecision {
            allowed: count <= limit,
            limit,
            remaining: (limit - count).max(0),
            reset_at,
            limit_type,
        }
    }

    /// Fail-open decision: full quota, window-length reset.
    fn open(limit: i64, window: Duration, limit_type: LimitType) -> Self {
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: Utc::now() + window,
            limit_type,
        }
    }

    pub fn retry_after_secs(&self) -> u64 {
        (self.reset_at - Utc::now()).num_seconds().max(0) as u64
    }

    /// Stamps the three quota headers. `Retry-After` is added separately on
    /// denial by the error path.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let entries = [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at.timestamp().to_string()),
        ];
        for (name, value) in entries {
            if let Ok(v) = HeaderValue::from_str(&value) {
                headers.insert(name, v);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The monthly source-of-truth query failed. Unlike cache degradation
    /// this surfaces to the caller: the monthly cap guards billed quota.
    #[error("rate-limit store failure: {0}")]
    Store(#[source] anyhow::Error),
}

/// First and one-past-last instants of the calendar month containing `now`.
pub fn month_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let next = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
    (start, next)
}

pub fn month_cache_key(api_key_id: Uuid, now: DateTime<Utc>) -> String {
    cache_key(&[
        "usage",
        "month",
        &api_key_id.to_string(),
        &now.format("%Y%m").to_string(),
    ])
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Cache,
    rate_store: Arc<dyn RateLimitStore>,
    usage_store: Arc<dyn UsageStore>,
    monthly_cache_ttl_seconds: u64,
}

impl RateLimiter {
    pub fn new(
        cache: Cache,
        rate_store: Arc<dyn RateLimitStore>,
        usage_store: Arc<dyn UsageStore>,
        monthly_cache_ttl_seconds: u64,
    ) -> Self {
        RateLimiter {
            cache,
            rate_store,
            usage_store,
            monthly_cache_ttl_seconds,
        }
    }

    /// Admission decision for one request. Per-minute first (cheap, always
    /// enforced), then the monthly cap when the tier has a finite one.
    pub async fn check(&self, identity: &KeyIdentity) -> Result<RateLimitDecision, RateLimitError> {
        let limits = TierLimits::for_tier(identity.tier);

        let minute = self
            .check_minute(identity.api_key_id, limits.requests_per_minute)
            .await;
        if !minute.allowed {
            return Ok(minute);
        }

        if !limits.monthly_unlimited() {
            let monthly = self
                .check_monthly(identity.api_key_id, limits.requests_per_month)
                .await?;
            if !monthly.allowed {
                return Ok(monthly);
            }
        }

        Ok(minute)
    }

    async fn check_minute(&self, api_key_id: Uuid, limit: i64) -> RateLimitDecision {
        let key = cache_key(&["rl", &api_key_id.to_string(), "minute"]);

        // Atomic increment; the over-limit request consumes its slot too,
        // so hammering the boundary is never free.
        let count = self.cache.incr(&key).await;
        if count == 0 {
            // Counters start at 1, so 0 means the cache is down.
            return self.check_minute_durable(api_key_id, limit).await;
        }

        if count == 1 {
            self.cache.expire(&key, MINUTE_WINDOW_SECS as u64).await;
        }

        let ttl = self.cache.ttl(&key).await;
        let ttl = if ttl > 0 { ttl } else { MINUTE_WINDOW_SECS };
        let reset_at = Utc::now() + Duration::seconds(ttl);

        RateLimitDecision::from_count(count, limit, reset_at, LimitType::PerMinute)
    }

    async fn check_minute_durable(&self, api_key_id: Uuid, limit: i64) -> RateLimitDecision {
        let now = Utc::now();
        let window_secs = now.timestamp() - now.timestamp() % MINUTE_WINDOW_SECS;
        let window_start = DateTime::from_timestamp(window_secs, 0).unwrap_or(now);

        match self
            .rate_store
            .increment_window(api_key_id, LimitType::PerMinute.as_str(), window_start)
            .await
        {
            Ok(count) => RateLimitDecision::from_count(
                count,
                limit,
                window_start + Duration::seconds(MINUTE_WINDOW_SECS),
                LimitType::PerMinute,
            ),
            Err(e) => {
                // Cache and database both unreachable: availability wins
                // over strict enforcement.
                tracing::warn!(
                    %api_key_id,
                    "rate-limit stores unavailable, failing open: {:#}",
                    e
                );
                RateLimitDecision::open(
                    limit,
                    Duration::seconds(MINUTE_WINDOW_SECS),
                    LimitType::PerMinute,
                )
            }
        }
    }

    async fn check_monthly(
        &self,
        api_key_id: Uuid,
        limit: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = Utc::now();
        let (month_start, next_month) = month_window(now);
        let key = month_cache_key(api_key_id, now);

        let usage_store = self.usage_store.clone();
        let (count, _was_cached) = self
            .cache
            .get_or_set(&key, self.monthly_cache_ttl_seconds, || async move {
                usage_store
                    .count_between(api_key_id, month_start, next_month)
                    .await
            })
            .await
            .map_err(RateLimitError::Store)?;

        Ok(RateLimitDecision {
            allowed: count < limit,
            limit,
            remaining: (limit - count - 1).max(0),
            reset_at: next_month,
            limit_type: LimitType::Monthly,
        })
    }
}
