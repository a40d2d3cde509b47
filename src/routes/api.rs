use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::pipeline;
use crate::AppState;

/// Protected data API. Every route here sits behind the admission
/// pipeline: key validation, rate limiting, usage accounting.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/workouts", get(handlers::workouts::list))
        .route("/workouts/:slug", get(handlers::workouts::get))
        .route("/keys", get(handlers::keys::list).post(handlers::keys::create))
        .route("/keys/:id", delete(handlers::keys::revoke))
        .route("/keys/:id/regenerate", post(handlers::keys::regenerate))
        .route("/usage/stats", get(handlers::usage::stats))
        .route("/usage/month", get(handlers::usage::month))
        .layer(middleware::from_fn_with_state(state, pipeline::admission))
}
