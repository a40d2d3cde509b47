use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Subscription tier. Ordered: a tier can access content gated at its own
/// level and below.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    ToSchema,
)]
#[sqlx(type_name = "tier", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl sqlx::postgres::PgHasArrayType for Tier {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_tier")
    }
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Every tier whose content this tier may read, own level included.
    pub fn accessible_tiers(&self) -> Vec<Tier> {
        [Tier::Free, Tier::Pro, Tier::Enterprise]
            .into_iter()
            .filter(|t| t <= self)
            .collect()
    }

    pub fn can_access(&self, required: Tier) -> bool {
        *self >= required
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Incomplete,
    Canceled,
}

impl SubscriptionStatus {
    /// Whether keys under a subscription in this state are admitted.
    pub fn allows_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hard-coded quota table. `requests_per_month < 0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub requests_per_minute: i64,
    pub requests_per_month: i64,
    pub max_api_keys: i64,
}

impl TierLimits {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => TierLimits {
                requests_per_minute: 10,
                requests_per_month: 1_000,
                max_api_keys: 1,
            },
            Tier::Pro => TierLimits {
                requests_per_minute: 100,
                requests_per_month: 100_000,
                max_api_keys: 5,
            },
            Tier::Enterprise => TierLimits {
                requests_per_minute: 1_000,
                requests_per_month: -1,
                max_api_keys: 20,
            },
        }
    }

    pub fn monthly_unlimited(&self) -> bool {
        self.requests_per_month < 0
    }
}
