use axum::{
    extract::{Extension, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::models::subscription::TierLimits;
use crate::models::usage::UsageStats;
use crate::pipeline::RequestContext;
use crate::rate_limit::month_window;
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsParams {
    /// Trailing window in hours, 1-720. Defaults to 24.
    pub hours: Option<i64>,
}

/// Usage aggregates over a trailing window.
#[utoipa::path(
    get,
    path = "/api/v1/usage/stats",
    tag = "usage",
    params(StatsParams),
    responses((status = 200, description = "Totals and average latency", body = UsageStats)),
    security(("api_key" = []))
)]
pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<StatsParams>,
) -> Result<Json<ApiResponse<UsageStats>>, ApiError> {
    let hours = params.hours.unwrap_or(24).clamp(1, 720);
    let since = Utc::now() - Duration::hours(hours);
    let stats = state
        .usage
        .stats(ctx.identity.api_key_id, since)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(ApiResponse::new(stats, ctx.request_id)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MonthUsage {
    pub count: i64,
    /// -1 means the tier is unlimited.
    pub limit: i64,
    pub remaining: Option<i64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Current calendar-month request count against the tier cap.
#[utoipa::path(
    get,
    path = "/api/v1/usage/month",
    tag = "usage",
    responses((status = 200, description = "Current month usage", body = MonthUsage)),
    security(("api_key" = []))
)]
pub async fn month(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ApiResponse<MonthUsage>>, ApiError> {
    let count = state
        .usage
        .month_count(ctx.identity.api_key_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    let limits = TierLimits::for_tier(ctx.identity.tier);
    let (period_start, period_end) = month_window(Utc::now());
    let remaining = if limits.monthly_unlimited() {
        None
    } else {
        Some((limits.requests_per_month - count).max(0))
    };

    Ok(Json(ApiResponse::new(
        MonthUsage {
            count,
            limit: limits.requests_per_month,
            remaining,
            period_start,
            period_end,
        },
        ctx.request_id,
    )))
}
