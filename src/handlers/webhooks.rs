//! Payment-provider webhook intake. The provider's protocol is an external
//! contract; the obligations here are signature verification and reacting
//! to subscription transitions so cached key validations cannot outlive a
//! tenant's real entitlement.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::subscription::{SubscriptionStatus, Tier};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEventData {
    pub user_id: Uuid,
    pub tier: Option<Tier>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    verify_signature(&state, &headers, &body)?;

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("malformed webhook payload: {e}")))?;

    let user_id = event.data.user_id;
    tracing::info!(%user_id, event_type = %event.event_type, "payment webhook received");

    match event.event_type.as_str() {
        "subscription.activated" | "subscription.charged" | "subscription.resumed" => {
            let now = Utc::now();
            let start = event.data.current_period_start.unwrap_or(now);
            let end = event
                .data
                .current_period_end
                .unwrap_or(now + Duration::days(30));
            state
                .subscriptions
                .activate(user_id, event.data.tier.unwrap_or(Tier::Free), start, end)
                .await?;
        }
        "subscription.payment_failed" | "subscription.paused" => {
            state
                .subscriptions
                .set_status(user_id, SubscriptionStatus::PastDue)
                .await?;
        }
        "subscription.cancelled" => {
            state
                .subscriptions
                .set_status(user_id, SubscriptionStatus::Canceled)
                .await?;
            // Cancellation also retires the tenant's credentials.
            for prefix in state.api_keys.deactivate_all_for_user(user_id).await? {
                state.validator.invalidate_prefix(&prefix).await;
            }
        }
        other => {
            tracing::debug!(event_type = other, "ignoring unhandled webhook event");
            return Ok((StatusCode::OK, Json(json!({ "received": true }))));
        }
    }

    // Any status transition invalidates cached validations immediately;
    // the validation TTL is only a backstop.
    state.validator.invalidate_user(user_id).await?;

    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let presented = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing webhook signature"))?;
    let presented = hex::decode(presented)
        .map_err(|_| ApiError::unauthorized("invalid webhook signature encoding"))?;

    let secret = state.config.webhook.signing_secret.expose_secret();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::from(anyhow::anyhow!("webhook secret unusable: {e}")))?;
    mac.update(body);
    mac.verify_slice(&presented)
        .map_err(|_| ApiError::unauthorized("webhook signature mismatch"))
}
