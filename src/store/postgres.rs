use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::api_key::{ApiKey, ApiKeyWithSubscription, NewApiKey};
use crate::models::subscription::{Subscription, SubscriptionStatus, Tier};
use crate::models::usage::{NewUsageRecord, UsageStats};
use crate::models::workout::{Workout, WorkoutFilter};

use super::{ApiKeyStore, RateLimitStore, SubscriptionStore, UsageStore, WorkoutStore};

const API_KEY_COLUMNS: &str = "id, user_id, subscription_id, key_hash, key_prefix, name, \
     is_active, created_at, expires_at, last_used_at";

const WORKOUT_COLUMNS: &str = "id, name, slug, difficulty, muscle_groups, equipment, \
     instructions, tier_access, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresStore { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PostgresStore {
    async fn find_active_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<ApiKeyWithSubscription>> {
        let row = sqlx::query_as::<_, ApiKeyWithSubscription>(
            "SELECT k.id, k.user_id, k.subscription_id, k.key_hash, k.key_prefix,
                    k.expires_at, s.tier, s.status AS subscription_status,
                    s.current_period_end
             FROM api_keys k
             JOIN subscriptions s ON s.id = k.subscription_id
             WHERE k.key_prefix = $1 AND k.is_active = TRUE",
        )
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up API key by prefix")?;
        Ok(row)
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update last_used_at")?;
        Ok(())
    }

    async fn insert(&self, key: NewApiKey) -> Result<ApiKey> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            "INSERT INTO api_keys (user_id, subscription_id, key_hash, key_prefix, name, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(key.user_id)
        .bind(key.subscription_id)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.name)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert API key")?;
        Ok(row)
    }

    async fn deactivate(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>> {
        let prefix: Option<String> = sqlx::query_scalar(
            "UPDATE api_keys SET is_active = FALSE
             WHERE id = $1 AND user_id = $2 AND is_active = TRUE
             RETURNING key_prefix",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to deactivate API key")?;
        Ok(prefix)
    }

    async fn schedule_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET expires_at = $2 WHERE id = $1")
            .bind(id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("failed to schedule API key expiry")?;
        Ok(())
    }

    async fn count_active_for_user(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM api_keys WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count active API keys")?;
        Ok(count)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys
             WHERE user_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list API keys")?;
        Ok(rows)
    }

    async fn find_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch API key")?;
        Ok(row)
    }

    async fn prefixes_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let prefixes: Vec<String> = sqlx::query_scalar(
            "SELECT key_prefix FROM api_keys WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch key prefixes")?;
        Ok(prefixes)
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<Vec<String>> {
        let prefixes: Vec<String> = sqlx::query_scalar(
            "UPDATE api_keys SET is_active = FALSE
             WHERE user_id = $1 AND is_active = TRUE
             RETURNING key_prefix",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to deactivate user's API keys")?;
        Ok(prefixes)
    }
}

#[async_trait]
impl UsageStore for PostgresStore {
    async fn insert(&self, record: NewUsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_usage
                 (api_key_id, user_id, endpoint, method, status_code,
                  response_time_ms, request_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.api_key_id)
        .bind(record.user_id)
        .bind(&record.endpoint)
        .bind(&record.method)
        .bind(record.status_code)
        .bind(record.response_time_ms)
        .bind(record.request_id)
        .execute(&self.pool)
        .await
        .context("failed to insert usage record")?;
        Ok(())
    }

    async fn count_between(
        &self,
        api_key_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM api_usage
             WHERE api_key_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(api_key_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .context("failed to count usage")?;
        Ok(count)
    }

    async fn stats_since(&self, api_key_id: Uuid, since: DateTime<Utc>) -> Result<UsageStats> {
        let stats = sqlx::query_as::<_, UsageStats>(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status_code < 400) AS succeeded,
                    COUNT(*) FILTER (WHERE status_code >= 400) AS failed,
                    COALESCE(AVG(response_time_ms), 0)::FLOAT8 AS avg_latency_ms
             FROM api_usage
             WHERE api_key_id = $1 AND created_at >= $2",
        )
        .bind(api_key_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate usage stats")?;
        Ok(stats)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_usage WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to purge usage records")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RateLimitStore for PostgresStore {
    async fn increment_window(
        &self,
        api_key_id: Uuid,
        limit_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        // Single conditional statement; the unique constraint on
        // (api_key_id, limit_type, window_start) makes this race-free.
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO rate_limits (api_key_id, limit_type, window_start, request_count)
             VALUES ($1, $2, $3, 1)
             ON CONFLICT (api_key_id, limit_type, window_start)
             DO UPDATE SET request_count = rate_limits.request_count + 1,
                           updated_at = NOW()
             RETURNING request_count",
        )
        .bind(api_key_id)
        .bind(limit_type)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await
        .context("failed to increment durable rate-limit window")?;
        Ok(count)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to purge rate-limit windows")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkoutStore for PostgresStore {
    async fn list(
        &self,
        tiers: &[Tier],
        filter: &WorkoutFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workout>, i64)> {
        let tiers = tiers.to_vec();

        let rows = sqlx::query_as::<_, Workout>(&format!(
            "SELECT {WORKOUT_COLUMNS} FROM workouts
             WHERE NOT is_deleted
               AND tier_access = ANY($1)
               AND ($2::difficulty IS NULL OR difficulty = $2)
               AND ($3::text IS NULL OR $3 = ANY(muscle_groups))
               AND ($4::text IS NULL OR $4 = ANY(equipment))
             ORDER BY name
             LIMIT $5 OFFSET $6"
        ))
        .bind(&tiers)
        .bind(filter.difficulty)
        .bind(&filter.muscle_group)
        .bind(&filter.equipment)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list workouts")?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workouts
             WHERE NOT is_deleted
               AND tier_access = ANY($1)
               AND ($2::difficulty IS NULL OR difficulty = $2)
               AND ($3::text IS NULL OR $3 = ANY(muscle_groups))
               AND ($4::text IS NULL OR $4 = ANY(equipment))",
        )
        .bind(&tiers)
        .bind(filter.difficulty)
        .bind(&filter.muscle_group)
        .bind(&filter.equipment)
        .fetch_one(&self.pool)
        .await
        .context("failed to count workouts")?;

        Ok((rows, total))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Workout>> {
        let row = sqlx::query_as::<_, Workout>(&format!(
            "SELECT {WORKOUT_COLUMNS} FROM workouts WHERE slug = $1 AND NOT is_deleted"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch workout by slug")?;
        Ok(row)
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, tier, status, current_period_start, \
     current_period_end, cancel_at_period_end, created_at, updated_at";

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE user_id = $1 AND status IN ('active', 'trialing')"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch active subscription")?;
        Ok(row)
    }

    async fn activate(
        &self,
        user_id: Uuid,
        tier: Tier,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Subscription> {
        // Targets the partial unique index on live subscriptions, so
        // concurrent webhook deliveries converge on one row.
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions
                 (user_id, tier, status, current_period_start, current_period_end)
             VALUES ($1, $2, 'active', $3, $4)
             ON CONFLICT (user_id) WHERE status IN ('active', 'trialing')
             DO UPDATE SET tier = EXCLUDED.tier,
                           status = 'active',
                           current_period_start = EXCLUDED.current_period_start,
                           current_period_end = EXCLUDED.current_period_end,
                           updated_at = NOW()
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(tier)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .context("failed to activate subscription")?;
        Ok(row)
    }

    async fn set_status(&self, user_id: Uuid, status: SubscriptionStatus) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = $2, updated_at = NOW()
             WHERE id = (
                 SELECT id FROM subscriptions
                 WHERE user_id = $1 AND status <> 'canceled'
                 ORDER BY created_at DESC
                 LIMIT 1
             )",
        )
        .bind(user_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .context("failed to update subscription status")?;
        Ok(result.rows_affected())
    }
}
