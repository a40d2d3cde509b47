//! API-key issuance and validation.
//!
//! Keys look like `wk_<40 alphanumeric chars>`. Only an argon2 hash and the
//! first 12 characters (the lookup prefix) are ever stored. Validation is
//! cache-then-database: a cached result under the prefix short-circuits the
//! database for up to the configured TTL, trading a bounded authorization
//! lag for a database-free hot path.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

use crate::cache::{cache_key, Cache};
use crate::models::api_key::KeyIdentity;
use crate::store::ApiKeyStore;

/// Fixed key shape: `wk_` + 40 random alphanumeric characters.
pub const KEY_SIGIL: &str = "wk_";
pub const KEY_SECRET_LEN: usize = 40;
pub const KEY_TOTAL_LEN: usize = 43;
/// Non-secret lookup index length.
pub const LOOKUP_PREFIX_LEN: usize = 12;

/// Grace window applied to the old key when a tenant regenerates.
pub fn regeneration_grace() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no API key presented")]
    Missing,
    #[error("API key does not match the expected format")]
    Malformed,
    #[error("no active key with this prefix")]
    NotFound,
    #[error("API key has an expiry in the past")]
    Expired,
    #[error("presented secret does not match the stored hash")]
    BadSecret,
    #[error("owning subscription is not active or trialing")]
    SubscriptionInactive,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A freshly generated key. The plaintext exists only here and in the
/// one-time creation response.
pub struct GeneratedKey {
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

pub fn generate_key() -> anyhow::Result<GeneratedKey> {
    let secret: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SECRET_LEN)
        .map(char::from)
        .collect();
    let plaintext = format!("{KEY_SIGIL}{secret}");
    let prefix = plaintext[..LOOKUP_PREFIX_LEN].to_string();

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash API key: {e}"))?
        .to_string();

    Ok(GeneratedKey {
        plaintext,
        prefix,
        hash,
    })
}

pub fn verify_key(plaintext: &str, phc_hash: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(phc_hash)
        .map_err(|e| AuthError::Store(anyhow::anyhow!("stored hash is unparseable: {e}")))?;
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .map_err(|_| AuthError::BadSecret)
}

pub fn is_well_formed(token: &str) -> bool {
    token.len() == KEY_TOTAL_LEN
        && token.starts_with(KEY_SIGIL)
        && token[KEY_SIGIL.len()..].chars().all(|c| c.is_ascii_alphanumeric())
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn validation_cache_key(prefix: &str) -> String {
    cache_key(&["apikey", prefix])
}

#[derive(Clone)]
pub struct ApiKeyValidator {
    store: Arc<dyn ApiKeyStore>,
    cache: Cache,
    cache_ttl_seconds: u64,
}

impl ApiKeyValidator {
    pub fn new(store: Arc<dyn ApiKeyStore>, cache: Cache, cache_ttl_seconds: u64) -> Self {
        ApiKeyValidator {
            store,
            cache,
            cache_ttl_seconds,
        }
    }

    /// Resolves a bearer credential to a tenant identity.
    pub async fn validate(&self, bearer: Option<&str>) -> Result<KeyIdentity, AuthError> {
        let token = bearer.ok_or(AuthError::Missing)?;
        if !is_well_formed(token) {
            return Err(AuthError::Malformed);
        }

        let prefix = &token[..LOOKUP_PREFIX_LEN];
        let key = validation_cache_key(prefix);
        let token_digest = sha256_hex(token);

        if let Some(identity) = self.cache.get_json::<KeyIdentity>(&key).await {
            // The cache is keyed by prefix; the digest check proves the
            // caller presented the same secret the cold path verified.
            if identity.token_sha256 == token_digest {
                self.touch_last_used(identity.api_key_id);
                return Ok(identity);
            }
        }

        let record = self
            .store
            .find_active_by_prefix(prefix)
            .await?
            .ok_or(AuthError::NotFound)?;

        if let Some(expires_at) = record.expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::Expired);
            }
        }

        verify_key(token, &record.key_hash)?;

        if !record.subscription_status.allows_access() {
            return Err(AuthError::SubscriptionInactive);
        }

        let identity = KeyIdentity {
            api_key_id: record.id,
            user_id: record.user_id,
            tier: record.tier,
            token_sha256: token_digest,
        };

        self.touch_last_used(identity.api_key_id);
        self.cache
            .set_json(&key, &identity, self.cache_ttl_seconds)
            .await;

        Ok(identity)
    }

    /// Synchronous cache invalidation for a prefix whose validity changed
    /// (revoke, regenerate, subscription transition).
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.cache.del(&validation_cache_key(prefix)).await;
    }

    /// Drops every cached validation belonging to a user.
    pub async fn invalidate_user(&self, user_id: uuid::Uuid) -> anyhow::Result<()> {
        for prefix in self.store.prefixes_for_user(user_id).await? {
            self.invalidate_prefix(&prefix).await;
        }
        Ok(())
    }

    // Last-used writes never block or fail the request.
    fn touch_last_used(&self, api_key_id: uuid::Uuid) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(api_key_id).await {
                tracing::debug!("last_used_at update failed: {:#}", e);
            }
        });
    }
}
