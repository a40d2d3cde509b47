use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::subscription::{SubscriptionStatus, Tier};

/// An API-key row. The plaintext key is never stored: `key_hash` is an
/// argon2 PHC string and `key_prefix` (first 12 chars of the plaintext)
/// is the non-secret lookup index.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Key row joined with its subscription, as fetched on the validation path.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyWithSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub key_hash: String,
    pub key_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub tier: Tier,
    pub subscription_status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a successful validation resolves to; this is also the shape cached
/// under the key prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyIdentity {
    pub api_key_id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
    /// SHA-256 of the full presented plaintext. Cache entries are keyed by
    /// prefix, so a hit must still prove the caller holds the same secret
    /// that passed argon2 on the cold path.
    pub token_sha256: String,
}

/// Public listing shape; never exposes the hash.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeySummary {
    fn from(k: ApiKey) -> Self {
        ApiKeySummary {
            id: k.id,
            name: k.name,
            key_prefix: k.key_prefix,
            is_active: k.is_active,
            created_at: k.created_at,
            expires_at: k.expires_at,
            last_used_at: k.last_used_at,
        }
    }
}
