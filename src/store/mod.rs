//! Persistence seams. Each pipeline component takes its store as a trait
//! object so tests can substitute in-memory fakes; `PostgresStore` is the
//! production implementation of all of them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::api_key::{ApiKey, ApiKeyWithSubscription, NewApiKey};
use crate::models::subscription::{Subscription, SubscriptionStatus, Tier};
use crate::models::usage::{NewUsageRecord, UsageStats};
use crate::models::workout::{Workout, WorkoutFilter};

pub mod postgres;

pub use postgres::PostgresStore;

#[async_trait]
pub trait ApiKeyStore: Send + Sync + 'static {
    /// Lookup by non-secret prefix, active keys only, joined with the
    /// owning subscription.
    async fn find_active_by_prefix(&self, prefix: &str)
        -> Result<Option<ApiKeyWithSubscription>>;

    async fn touch_last_used(&self, id: Uuid) -> Result<()>;

    async fn insert(&self, key: NewApiKey) -> Result<ApiKey>;

    /// Deactivates a key owned by `user_id`. Returns the key's prefix when
    /// a row was updated, so callers can invalidate the cache entry.
    async fn deactivate(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>>;

    /// Sets an explicit expiry (used for the regeneration grace window).
    async fn schedule_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<()>;

    async fn count_active_for_user(&self, user_id: Uuid) -> Result<i64>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>>;

    async fn find_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>>;

    /// Prefixes of all active keys for a user; the webhook path deletes the
    /// cached validation under each after a subscription status change.
    async fn prefixes_for_user(&self, user_id: Uuid) -> Result<Vec<String>>;

    /// Deactivates every active key for a user (subscription cancellation).
    /// Returns the affected prefixes for cache invalidation.
    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<Vec<String>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync + 'static {
    async fn insert(&self, record: NewUsageRecord) -> Result<()>;

    /// Authoritative request count for a key in `[from, to)`.
    async fn count_between(
        &self,
        api_key_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    async fn stats_since(&self, api_key_id: Uuid, since: DateTime<Utc>) -> Result<UsageStats>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Atomically upserts-and-increments the counter for one fixed window.
    /// Single statement; concurrent callers all observe monotonically
    /// increasing counts.
    async fn increment_window(
        &self,
        api_key_id: Uuid,
        limit_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait WorkoutStore: Send + Sync + 'static {
    /// Lists non-deleted workouts visible to the given tiers, filtered and
    /// paginated. Returns `(page, total)`.
    async fn list(
        &self,
        tiers: &[Tier],
        filter: &WorkoutFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workout>, i64)>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Workout>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>>;

    /// Webhook activation path. Upserts against the partial unique index on
    /// live subscriptions instead of trusting created_at ordering.
    async fn activate(
        &self,
        user_id: Uuid,
        tier: Tier,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Subscription>;

    /// Moves the user's most recent non-canceled subscription to `status`.
    /// Returns the number of rows updated.
    async fn set_status(&self, user_id: Uuid, status: SubscriptionStatus) -> Result<u64>;
}
