use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod pipeline;
pub mod rate_limit;
pub mod response;
pub mod routes;
pub mod store;
pub mod usage;

pub use auth::ApiKeyValidator;
pub use rate_limit::RateLimiter;
pub use usage::UsageLogger;

use cache::Cache;
use store::{ApiKeyStore, SubscriptionStore, WorkoutStore};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: config::Settings,
    pub cache: Cache,
    pub validator: ApiKeyValidator,
    pub limiter: RateLimiter,
    pub usage: UsageLogger,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub workouts: Arc<dyn WorkoutStore>,
}

/// Create the main Axum application router
pub fn create_app(state: AppState) -> Router {
    let openapi = openapi::ApiDoc::openapi();

    Router::new()
        .nest("/api/v1", routes::api::api_router(state.clone()))
        .merge(routes::webhooks::webhook_router())
        .merge(routes::health::health_router())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
