//! Request-admission pipeline. Runs as axum middleware in front of every
//! protected data endpoint, in fixed order: resolve the API key, apply the
//! rate limit, run the handler, then account the request.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::error::ApiError;
use crate::models::api_key::KeyIdentity;
use crate::models::usage::NewUsageRecord;
use crate::rate_limit::RateLimitError;
use crate::AppState;

/// Attached to every admitted request; handlers extract it to know the
/// tenant and to echo the correlation id in response envelopes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: KeyIdentity,
    pub request_id: Uuid,
}

pub async fn admission(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let bearer = request.headers().typed_get::<Authorization<Bearer>>();

    let identity = match state
        .validator
        .validate(bearer.as_ref().map(|auth| auth.token()))
        .await
    {
        Ok(identity) => identity,
        Err(e) => return auth_error(e).with_request_id(request_id).into_response(),
    };

    let decision = match state.limiter.check(&identity).await {
        Ok(decision) => decision,
        Err(RateLimitError::Store(e)) => {
            tracing::error!(%request_id, "monthly quota check failed: {:#}", e);
            return ApiError::internal().with_request_id(request_id).into_response();
        }
    };

    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();

    if !decision.allowed {
        state.usage.record(NewUsageRecord {
            api_key_id: identity.api_key_id,
            user_id: identity.user_id,
            endpoint,
            method,
            status_code: 429,
            response_time_ms: started.elapsed().as_millis() as i32,
            request_id,
        });

        let mut response = ApiError::rate_limited(decision.retry_after_secs())
            .with_details(json!({ "limit_type": decision.limit_type.as_str() }))
            .with_request_id(request_id)
            .into_response();
        decision.apply_headers(response.headers_mut());
        return response;
    }

    request.extensions_mut().insert(RequestContext {
        identity: identity.clone(),
        request_id,
    });

    let mut response = next.run(request).await;

    decision.apply_headers(response.headers_mut());
    if !response.headers().contains_key("x-request-id") {
        if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("x-request-id", v);
        }
    }

    state.usage.record(NewUsageRecord {
        api_key_id: identity.api_key_id,
        user_id: identity.user_id,
        endpoint,
        method,
        status_code: response.status().as_u16() as i32,
        response_time_ms: started.elapsed().as_millis() as i32,
        request_id,
    });

    response
}

fn auth_error(e: AuthError) -> ApiError {
    match e {
        AuthError::Missing => ApiError::missing_api_key(),
        // Unknown prefix and wrong secret are indistinguishable on purpose.
        AuthError::Malformed | AuthError::NotFound | AuthError::BadSecret => {
            ApiError::invalid_api_key()
        }
        AuthError::Expired => ApiError::expired_api_key(),
        AuthError::SubscriptionInactive => ApiError::subscription_inactive(),
        AuthError::Store(err) => {
            tracing::error!("credential lookup failed: {:#}", err);
            ApiError::internal()
        }
    }
}
