//! Shared test backing: one in-memory fake implementing every store seam,
//! plus an always-failing cache store for degradation scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::Secret;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use fitserve::auth::generate_key;
use fitserve::cache::{Cache, CacheStore, MemoryStore};
use fitserve::config::settings::{
    CacheSettings, DatabaseSettings, RetentionSettings, ServerSettings, Settings, WebhookSettings,
};
use fitserve::models::api_key::{ApiKey, ApiKeyWithSubscription, NewApiKey};
use fitserve::models::subscription::{Subscription, SubscriptionStatus, Tier};
use fitserve::models::usage::{NewUsageRecord, UsageStats};
use fitserve::models::workout::{Difficulty, Workout, WorkoutFilter};
use fitserve::store::{
    ApiKeyStore, RateLimitStore, SubscriptionStore, UsageStore, WorkoutStore,
};
use fitserve::{ApiKeyValidator, AppState, RateLimiter, UsageLogger};

struct UsageRow {
    record: NewUsageRecord,
    created_at: DateTime<Utc>,
}

/// In-memory stand-in for Postgres, implementing every store trait the
/// pipeline components depend on.
#[derive(Default)]
pub struct FakeDb {
    keys: Mutex<Vec<ApiKey>>,
    subs: Mutex<Vec<Subscription>>,
    usage: Mutex<Vec<UsageRow>>,
    windows: Mutex<HashMap<(Uuid, String, i64), i64>>,
    workouts: Mutex<Vec<Workout>>,
    pub key_lookups: AtomicUsize,
    pub fail_rate_store: AtomicBool,
    pub fail_usage_counts: AtomicBool,
}

pub struct SeededTenant {
    pub plaintext: String,
    pub prefix: String,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub api_key_id: Uuid,
}

impl FakeDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_tenant(&self, tier: Tier, status: SubscriptionStatus) -> SeededTenant {
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            tier,
            status,
            current_period_start: now,
            current_period_end: now + chrono::Duration::days(30),
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        let generated = generate_key().unwrap();
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            subscription_id: subscription.id,
            key_hash: generated.hash,
            key_prefix: generated.prefix.clone(),
            name: "test key".to_string(),
            is_active: true,
            created_at: now,
            expires_at: None,
            last_used_at: None,
        };
        let seeded = SeededTenant {
            plaintext: generated.plaintext,
            prefix: generated.prefix,
            user_id,
            subscription_id: subscription.id,
            api_key_id: key.id,
        };
        self.subs.lock().unwrap().push(subscription);
        self.keys.lock().unwrap().push(key);
        seeded
    }

    pub fn expire_key(&self, api_key_id: Uuid, expires_at: DateTime<Utc>) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == api_key_id) {
            key.expires_at = Some(expires_at);
        }
    }

    pub fn seed_workout(&self, slug: &str, tier_access: Tier, difficulty: Difficulty) -> Workout {
        let now = Utc::now();
        let workout = Workout {
            id: Uuid::new_v4(),
            name: slug.replace('-', " "),
            slug: slug.to_string(),
            difficulty,
            muscle_groups: vec!["chest".to_string()],
            equipment: vec!["barbell".to_string()],
            instructions: "lift the thing".to_string(),
            tier_access,
            created_at: now,
            updated_at: now,
        };
        self.workouts.lock().unwrap().push(workout.clone());
        workout
    }

    pub fn seed_usage(&self, api_key_id: Uuid, user_id: Uuid, count: usize) {
        let mut usage = self.usage.lock().unwrap();
        for _ in 0..count {
            usage.push(UsageRow {
                record: NewUsageRecord {
                    api_key_id,
                    user_id,
                    endpoint: "/api/v1/workouts".to_string(),
                    method: "GET".to_string(),
                    status_code: 200,
                    response_time_ms: 5,
                    request_id: Uuid::new_v4(),
                },
                created_at: Utc::now(),
            });
        }
    }

    pub fn usage_rows(&self) -> usize {
        self.usage.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiKeyStore for FakeDb {
    async fn find_active_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<ApiKeyWithSubscription>> {
        self.key_lookups.fetch_add(1, Ordering::SeqCst);
        let keys = self.keys.lock().unwrap();
        let subs = self.subs.lock().unwrap();
        let Some(key) = keys.iter().find(|k| k.key_prefix == prefix && k.is_active) else {
            return Ok(None);
        };
        let sub = subs
            .iter()
            .find(|s| s.id == key.subscription_id)
            .ok_or_else(|| anyhow!("dangling subscription"))?;
        Ok(Some(ApiKeyWithSubscription {
            id: key.id,
            user_id: key.user_id,
            subscription_id: key.subscription_id,
            key_hash: key.key_hash.clone(),
            key_prefix: key.key_prefix.clone(),
            expires_at: key.expires_at,
            tier: sub.tier,
            subscription_status: sub.status,
            current_period_end: sub.current_period_end,
        }))
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert(&self, new: NewApiKey) -> Result<ApiKey> {
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            subscription_id: new.subscription_id,
            key_hash: new.key_hash,
            key_prefix: new.key_prefix,
            name: new.name,
            is_active: true,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            last_used_at: None,
        };
        self.keys.lock().unwrap().push(key.clone());
        Ok(key)
    }

    async fn deactivate(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>> {
        let mut keys = self.keys.lock().unwrap();
        match keys
            .iter_mut()
            .find(|k| k.id == id && k.user_id == user_id && k.is_active)
        {
            Some(key) => {
                key.is_active = false;
                Ok(Some(key.key_prefix.clone()))
            }
            None => Ok(None),
        }
    }

    async fn schedule_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn count_active_for_user(&self, user_id: Uuid) -> Result<i64> {
        let keys = self.keys.lock().unwrap();
        Ok(keys.iter().filter(|k| k.user_id == user_id && k.is_active).count() as i64)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys.iter().filter(|k| k.user_id == user_id).cloned().collect())
    }

    async fn find_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .iter()
            .find(|k| k.id == id && k.user_id == user_id)
            .cloned())
    }

    async fn prefixes_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|k| k.user_id == user_id && k.is_active)
            .map(|k| k.key_prefix.clone())
            .collect())
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let mut keys = self.keys.lock().unwrap();
        let mut prefixes = Vec::new();
        for key in keys.iter_mut().filter(|k| k.user_id == user_id && k.is_active) {
            key.is_active = false;
            prefixes.push(key.key_prefix.clone());
        }
        Ok(prefixes)
    }
}

#[async_trait]
impl UsageStore for FakeDb {
    async fn insert(&self, record: NewUsageRecord) -> Result<()> {
        self.usage.lock().unwrap().push(UsageRow {
            record,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn count_between(
        &self,
        api_key_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        if self.fail_usage_counts.load(Ordering::SeqCst) {
            return Err(anyhow!("usage store down"));
        }
        let usage = self.usage.lock().unwrap();
        Ok(usage
            .iter()
            .filter(|row| {
                row.record.api_key_id == api_key_id
                    && row.created_at >= from
                    && row.created_at < to
            })
            .count() as i64)
    }

    async fn stats_since(&self, api_key_id: Uuid, since: DateTime<Utc>) -> Result<UsageStats> {
        let usage = self.usage.lock().unwrap();
        let rows: Vec<_> = usage
            .iter()
            .filter(|row| row.record.api_key_id == api_key_id && row.created_at >= since)
            .collect();
        let total = rows.len() as i64;
        let succeeded = rows.iter().filter(|r| r.record.status_code < 400).count() as i64;
        let avg_latency_ms = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|r| f64::from(r.record.response_time_ms)).sum::<f64>()
                / rows.len() as f64
        };
        Ok(UsageStats {
            total,
            succeeded,
            failed: total - succeeded,
            avg_latency_ms,
        })
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut usage = self.usage.lock().unwrap();
        let before = usage.len();
        usage.retain(|row| row.created_at >= cutoff);
        Ok((before - usage.len()) as u64)
    }
}

#[async_trait]
impl RateLimitStore for FakeDb {
    async fn increment_window(
        &self,
        api_key_id: Uuid,
        limit_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        if self.fail_rate_store.load(Ordering::SeqCst) {
            return Err(anyhow!("rate-limit store down"));
        }
        let mut windows = self.windows.lock().unwrap();
        let counter = windows
            .entry((api_key_id, limit_type.to_string(), window_start.timestamp()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut windows = self.windows.lock().unwrap();
        let before = windows.len();
        windows.retain(|(_, _, start), _| *start >= cutoff.timestamp());
        Ok((before - windows.len()) as u64)
    }
}

#[async_trait]
impl WorkoutStore for FakeDb {
    async fn list(
        &self,
        tiers: &[Tier],
        filter: &WorkoutFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workout>, i64)> {
        let workouts = self.workouts.lock().unwrap();
        let matching: Vec<Workout> = workouts
            .iter()
            .filter(|w| tiers.contains(&w.tier_access))
            .filter(|w| filter.difficulty.map_or(true, |d| w.difficulty == d))
            .filter(|w| {
                filter
                    .muscle_group
                    .as_ref()
                    .map_or(true, |m| w.muscle_groups.contains(m))
            })
            .filter(|w| {
                filter
                    .equipment
                    .as_ref()
                    .map_or(true, |e| w.equipment.contains(e))
            })
            .cloned()
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Workout>> {
        let workouts = self.workouts.lock().unwrap();
        Ok(workouts.iter().find(|w| w.slug == slug).cloned())
    }
}

#[async_trait]
impl SubscriptionStore for FakeDb {
    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let subs = self.subs.lock().unwrap();
        Ok(subs
            .iter()
            .find(|s| s.user_id == user_id && s.status.allows_access())
            .cloned())
    }

    async fn activate(
        &self,
        user_id: Uuid,
        tier: Tier,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut subs = self.subs.lock().unwrap();
        if let Some(sub) = subs
            .iter_mut()
            .find(|s| s.user_id == user_id && s.status.allows_access())
        {
            sub.tier = tier;
            sub.status = SubscriptionStatus::Active;
            sub.current_period_start = period_start;
            sub.current_period_end = period_end;
            sub.updated_at = Utc::now();
            return Ok(sub.clone());
        }
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id,
            tier,
            status: SubscriptionStatus::Active,
            current_period_start: period_start,
            current_period_end: period_end,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        subs.push(sub.clone());
        Ok(sub)
    }

    async fn set_status(&self, user_id: Uuid, status: SubscriptionStatus) -> Result<u64> {
        let mut subs = self.subs.lock().unwrap();
        let target = subs
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.status != SubscriptionStatus::Canceled)
            .max_by_key(|s| s.created_at);
        match target {
            Some(sub) => {
                sub.status = status;
                sub.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Cache store whose every operation fails, for fail-open scenarios.
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("cache down"))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<()> {
        Err(anyhow!("cache down"))
    }
    async fn del(&self, _key: &str) -> Result<()> {
        Err(anyhow!("cache down"))
    }
    async fn del_pattern(&self, _pattern: &str) -> Result<u64> {
        Err(anyhow!("cache down"))
    }
    async fn incr(&self, _key: &str) -> Result<i64> {
        Err(anyhow!("cache down"))
    }
    async fn expire(&self, _key: &str, _ttl_seconds: u64) -> Result<()> {
        Err(anyhow!("cache down"))
    }
    async fn ttl(&self, _key: &str) -> Result<i64> {
        Err(anyhow!("cache down"))
    }
    async fn ping(&self) -> Result<()> {
        Err(anyhow!("cache down"))
    }
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
        },
        database: DatabaseSettings {
            host: "localhost".to_string(),
            port: 5432,
            username: "fitserve".to_string(),
            password: Secret::new("fitserve".to_string()),
            database_name: "fitserve_test".to_string(),
            require_ssl: false,
            min_connections: 1,
            max_connections: 2,
        },
        cache: CacheSettings {
            redis_url: "redis://localhost:6379".to_string(),
            enabled: false,
            validation_ttl_seconds: 300,
            monthly_count_ttl_seconds: 60,
        },
        retention: RetentionSettings {
            usage_days: 90,
            rate_window_days: 2,
            purge_interval_seconds: 3600,
        },
        webhook: WebhookSettings {
            signing_secret: Secret::new("test-signing-secret".to_string()),
        },
    }
}

pub fn test_state_with_cache(db: Arc<FakeDb>, cache: Cache) -> AppState {
    let settings = test_settings();
    // Never actually connected; handlers under test do not touch the pool.
    let db_pool = PgPoolOptions::new()
        .connect_lazy(&settings.database.connection_string())
        .unwrap();

    let validator = ApiKeyValidator::new(
        db.clone(),
        cache.clone(),
        settings.cache.validation_ttl_seconds,
    );
    let limiter = RateLimiter::new(
        cache.clone(),
        db.clone(),
        db.clone(),
        settings.cache.monthly_count_ttl_seconds,
    );
    let usage = UsageLogger::new(db.clone(), cache.clone());

    AppState {
        db_pool,
        config: settings,
        cache,
        validator,
        limiter,
        usage,
        api_keys: db.clone(),
        subscriptions: db.clone(),
        workouts: db,
    }
}

pub fn test_state(db: Arc<FakeDb>) -> AppState {
    test_state_with_cache(db, Cache::new(Arc::new(MemoryStore::new())))
}
