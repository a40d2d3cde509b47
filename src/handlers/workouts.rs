use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;

use crate::cache::{cache_key, hash_params};
use crate::error::ApiError;
use crate::models::workout::{Difficulty, Workout, WorkoutFilter};
use crate::pipeline::RequestContext;
use crate::response::ApiResponse;
use crate::AppState;

const LIST_CACHE_TTL_SECONDS: u64 = 60;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub muscle_group: Option<String>,
    pub equipment: Option<String>,
}

/// List workouts visible to the tenant's tier.
#[utoipa::path(
    get,
    path = "/api/v1/workouts",
    tag = "workouts",
    params(ListParams),
    responses(
        (status = 200, description = "Paginated workouts for the tenant's tier"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("api_key" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<Workout>>>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let tier = ctx.identity.tier;
    let filter = WorkoutFilter {
        difficulty: params.difficulty,
        muscle_group: params.muscle_group,
        equipment: params.equipment,
    };

    // Same filters in any order produce the same cache key.
    let key = cache_key(&[
        "workouts",
        "list",
        tier.as_str(),
        &hash_params(&json!({
            "difficulty": filter.difficulty,
            "muscle_group": filter.muscle_group,
            "equipment": filter.equipment,
            "page": page,
            "per_page": per_page,
        })),
    ]);

    let store = state.workouts.clone();
    let ((workouts, total), _) = state
        .cache
        .get_or_set(&key, LIST_CACHE_TTL_SECONDS, || async move {
            store
                .list(&tier.accessible_tiers(), &filter, per_page, offset)
                .await
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(Json(
        ApiResponse::new(workouts, ctx.request_id).with_pagination(page, per_page, total),
    ))
}

/// Fetch a single workout by slug.
#[utoipa::path(
    get,
    path = "/api/v1/workouts/{slug}",
    tag = "workouts",
    params(("slug" = String, Path, description = "Workout slug")),
    responses(
        (status = 200, description = "The workout"),
        (status = 403, description = "Workout requires a higher tier"),
        (status = 404, description = "No such workout")
    ),
    security(("api_key" = []))
)]
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<Workout>>, ApiError> {
    let workout = state
        .workouts
        .find_by_slug(&slug)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?
        .ok_or_else(|| ApiError::not_found("workout not found").with_request_id(ctx.request_id))?;

    if !ctx.identity.tier.can_access(workout.tier_access) {
        return Err(ApiError::forbidden("workout requires a higher subscription tier")
            .with_details(json!({ "required_tier": workout.tier_access }))
            .with_request_id(ctx.request_id));
    }

    Ok(Json(ApiResponse::new(workout, ctx.request_id)))
}
