mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use fitserve::cache::{cache_key, Cache, MemoryStore};
use fitserve::models::api_key::KeyIdentity;
use fitserve::models::subscription::{SubscriptionStatus, Tier, TierLimits};
use fitserve::rate_limit::{month_cache_key, month_window, LimitType, RateLimitError, RateLimiter};
use fitserve::UsageLogger;
use uuid::Uuid;

use common::{FailingCacheStore, FakeDb};

fn identity(tier: Tier) -> KeyIdentity {
    KeyIdentity {
        api_key_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        tier,
        token_sha256: String::new(),
    }
}

fn limiter_with(db: Arc<FakeDb>, cache: Cache) -> RateLimiter {
    RateLimiter::new(cache, db.clone(), db, 60)
}

#[tokio::test]
async fn minute_quota_allows_the_limit_then_denies() {
    let db = FakeDb::new();
    let limiter = limiter_with(db, Cache::new(Arc::new(MemoryStore::new())));
    let identity = identity(Tier::Free);
    let limit = TierLimits::for_tier(Tier::Free).requests_per_minute;

    for n in 1..=limit {
        let decision = limiter.check(&identity).await.unwrap();
        assert!(decision.allowed, "request {n} should be admitted");
        assert_eq!(decision.limit, limit);
        assert_eq!(decision.remaining, limit - n);
        assert_eq!(decision.limit_type, LimitType::PerMinute);
    }

    let denied = limiter.check(&identity).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.limit_type, LimitType::PerMinute);
    assert!(denied.reset_at > Utc::now());
}

#[tokio::test]
async fn window_expiry_restores_the_full_quota() {
    let db = FakeDb::new();
    let cache = Cache::new(Arc::new(MemoryStore::new()));
    let limiter = limiter_with(db, cache.clone());
    let identity = identity(Tier::Free);
    let limit = TierLimits::for_tier(Tier::Free).requests_per_minute;

    for _ in 0..=limit {
        limiter.check(&identity).await.unwrap();
    }
    assert!(!limiter.check(&identity).await.unwrap().allowed);

    // Stand-in for the counter's TTL elapsing.
    cache
        .del(&cache_key(&["rl", &identity.api_key_id.to_string(), "minute"]))
        .await;

    let fresh = limiter.check(&identity).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, limit - 1);
}

#[tokio::test]
async fn counter_ttl_elapsing_resets_the_window() {
    let cache = Cache::new(Arc::new(MemoryStore::new()));
    let key = cache_key(&["rl", &Uuid::new_v4().to_string(), "minute"]);

    // Same counter discipline as the fast path: expire on first hit.
    assert_eq!(cache.incr(&key).await, 1);
    cache.expire(&key, 1).await;
    assert_eq!(cache.incr(&key).await, 2);
    assert!(cache.ttl(&key).await >= 0);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    // The window lapsed; the next hit starts a fresh count.
    assert_eq!(cache.incr(&key).await, 1);
}

#[tokio::test]
async fn durable_window_enforces_when_the_cache_is_down() {
    let db = FakeDb::new();
    let limiter = limiter_with(db.clone(), Cache::new(Arc::new(FailingCacheStore)));
    let identity = identity(Tier::Free);
    let limit = TierLimits::for_tier(Tier::Free).requests_per_minute;

    for n in 1..=limit {
        let decision = limiter.check(&identity).await.unwrap();
        assert!(decision.allowed, "request {n} should be admitted");
    }

    let denied = limiter.check(&identity).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit_type, LimitType::PerMinute);
}

#[tokio::test]
async fn fails_open_when_cache_and_database_are_both_down() {
    let db = FakeDb::new();
    db.fail_rate_store.store(true, Ordering::SeqCst);
    let limiter = limiter_with(db, Cache::new(Arc::new(FailingCacheStore)));
    let identity = identity(Tier::Free);
    let limit = TierLimits::for_tier(Tier::Free).requests_per_minute;

    for _ in 0..(limit * 3) {
        let decision = limiter.check(&identity).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, limit);
    }
}

#[tokio::test]
async fn monthly_cap_denies_with_a_next_month_reset() {
    let db = FakeDb::new();
    let tenant = db.seed_tenant(Tier::Free, SubscriptionStatus::Active);
    let cap = TierLimits::for_tier(Tier::Free).requests_per_month;
    db.seed_usage(tenant.api_key_id, tenant.user_id, cap as usize);

    let limiter = limiter_with(db, Cache::new(Arc::new(MemoryStore::new())));
    let identity = KeyIdentity {
        api_key_id: tenant.api_key_id,
        user_id: tenant.user_id,
        tier: Tier::Free,
        token_sha256: String::new(),
    };

    let denied = limiter.check(&identity).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit_type, LimitType::Monthly);
    assert_eq!(denied.limit, cap);
    let (_, next_month) = month_window(Utc::now());
    assert_eq!(denied.reset_at, next_month);
}

#[tokio::test]
async fn unlimited_tiers_never_touch_the_usage_ledger() {
    let db = FakeDb::new();
    db.fail_usage_counts.store(true, Ordering::SeqCst);
    let limiter = limiter_with(db, Cache::new(Arc::new(MemoryStore::new())));

    let decision = limiter.check(&identity(Tier::Enterprise)).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn monthly_ledger_failure_surfaces_as_an_error() {
    let db = FakeDb::new();
    db.fail_usage_counts.store(true, Ordering::SeqCst);
    // A failing cache guarantees no stale count can paper over the outage.
    let limiter = limiter_with(db, Cache::new(Arc::new(FailingCacheStore)));

    let result = limiter.check(&identity(Tier::Free)).await;
    assert!(matches!(result, Err(RateLimitError::Store(_))));
}

#[tokio::test]
async fn recording_usage_invalidates_the_cached_month_count() {
    let db = FakeDb::new();
    let tenant = db.seed_tenant(Tier::Free, SubscriptionStatus::Active);
    let cache = Cache::new(Arc::new(MemoryStore::new()));
    let logger = UsageLogger::new(db.clone(), cache.clone());

    let key = month_cache_key(tenant.api_key_id, Utc::now());
    cache.set(&key, "0", 60).await;

    logger.record(fitserve::models::usage::NewUsageRecord {
        api_key_id: tenant.api_key_id,
        user_id: tenant.user_id,
        endpoint: "/api/v1/workouts".to_string(),
        method: "GET".to_string(),
        status_code: 200,
        response_time_ms: 4,
        request_id: Uuid::new_v4(),
    });

    // The write is fire-and-forget; give the task a beat to land.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(db.usage_rows(), 1);
    assert!(cache.get(&key).await.is_none());
}
