use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{generate_key, regeneration_grace};
use crate::error::ApiError;
use crate::models::api_key::{ApiKeySummary, NewApiKey};
use crate::models::subscription::TierLimits;
use crate::pipeline::RequestContext;
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateKeyRequest {
    pub name: String,
}

/// Creation/regeneration response. `key` is the plaintext, shown exactly
/// once.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedKey {
    pub key: String,
    #[serde(flatten)]
    pub summary: ApiKeySummary,
}

/// List the tenant's API keys (never the hashes).
#[utoipa::path(
    get,
    path = "/api/v1/keys",
    tag = "keys",
    responses((status = 200, description = "The tenant's keys")),
    security(("api_key" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ApiResponse<Vec<ApiKeySummary>>>, ApiError> {
    let keys = state
        .api_keys
        .list_for_user(ctx.identity.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    let summaries = keys.into_iter().map(ApiKeySummary::from).collect();
    Ok(Json(ApiResponse::new(summaries, ctx.request_id)))
}

/// Create a key, bounded by the tier's max-keys quota.
#[utoipa::path(
    post,
    path = "/api/v1/keys",
    tag = "keys",
    request_body = CreateKeyRequest,
    responses(
        (status = 201, description = "Key created; plaintext returned once"),
        (status = 403, description = "Tier key quota reached")
    ),
    security(("api_key" = []))
)]
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedKey>>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::validation("name must be 1-100 characters")
            .with_request_id(ctx.request_id));
    }

    let limits = TierLimits::for_tier(ctx.identity.tier);
    let active = state
        .api_keys
        .count_active_for_user(ctx.identity.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    if active >= limits.max_api_keys {
        return Err(ApiError::forbidden("API key quota for this tier reached")
            .with_details(json!({ "max_api_keys": limits.max_api_keys }))
            .with_request_id(ctx.request_id));
    }

    let subscription = state
        .subscriptions
        .find_active_for_user(ctx.identity.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?
        .ok_or_else(|| ApiError::subscription_inactive().with_request_id(ctx.request_id))?;

    let generated = generate_key()
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    let inserted = state
        .api_keys
        .insert(NewApiKey {
            user_id: ctx.identity.user_id,
            subscription_id: subscription.id,
            key_hash: generated.hash,
            key_prefix: generated.prefix,
            name: name.to_string(),
            expires_at: None,
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    let body = CreatedKey {
        key: generated.plaintext,
        summary: inserted.into(),
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(body, ctx.request_id)),
    ))
}

/// Revoke (deactivate) a key. Rows are never hard-deleted.
#[utoipa::path(
    delete,
    path = "/api/v1/keys/{id}",
    tag = "keys",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "No such key for this tenant")
    ),
    security(("api_key" = []))
)]
pub async fn revoke(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let prefix = state
        .api_keys
        .deactivate(id, ctx.identity.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?
        .ok_or_else(|| ApiError::not_found("API key not found").with_request_id(ctx.request_id))?;

    // Synchronous: a revoked key must stop validating now, not at TTL.
    state.validator.invalidate_prefix(&prefix).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Regenerate a key: issues a fresh secret and gives the old one a 24h
/// grace expiry so in-flight deployments can roll over.
#[utoipa::path(
    post,
    path = "/api/v1/keys/{id}/regenerate",
    tag = "keys",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 201, description = "Replacement key; plaintext returned once"),
        (status = 404, description = "No such key for this tenant")
    ),
    security(("api_key" = []))
)]
pub async fn regenerate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedKey>>), ApiError> {
    let old = state
        .api_keys
        .find_for_user(id, ctx.identity.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?
        .filter(|k| k.is_active)
        .ok_or_else(|| ApiError::not_found("API key not found").with_request_id(ctx.request_id))?;

    let generated = generate_key()
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    let inserted = state
        .api_keys
        .insert(NewApiKey {
            user_id: old.user_id,
            subscription_id: old.subscription_id,
            key_hash: generated.hash,
            key_prefix: generated.prefix,
            name: old.name.clone(),
            expires_at: None,
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    state
        .api_keys
        .schedule_expiry(old.id, Utc::now() + regeneration_grace())
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    state.validator.invalidate_prefix(&old.key_prefix).await;

    let body = CreatedKey {
        key: generated.plaintext,
        summary: inserted.into(),
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(body, ctx.request_id)),
    ))
}
