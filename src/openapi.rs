use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{health, keys, usage, workouts};
use crate::models::api_key::ApiKeySummary;
use crate::models::subscription::Tier;
use crate::models::usage::UsageStats;
use crate::models::workout::{Difficulty, Workout};

/// OpenAPI documentation for the data API.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::check,
        workouts::list,
        workouts::get,
        keys::list,
        keys::create,
        keys::revoke,
        keys::regenerate,
        usage::stats,
        usage::month,
    ),
    components(
        schemas(
            health::HealthResponse,
            Workout,
            Difficulty,
            Tier,
            ApiKeySummary,
            keys::CreateKeyRequest,
            keys::CreatedKey,
            UsageStats,
            usage::MonthUsage,
        )
    ),
    modifiers(&BearerApiKey),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "workouts", description = "Workout catalog, tier-gated"),
        (name = "keys", description = "API key lifecycle"),
        (name = "usage", description = "Usage metering read APIs"),
    )
)]
pub struct ApiDoc;

struct BearerApiKey;

impl Modify for BearerApiKey {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
            );
        }
    }
}
