use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fitserve::cache::{Cache, CacheStore, MemoryStore, RedisStore};
use fitserve::config::Settings;
use fitserve::store::{PostgresStore, RateLimitStore, UsageStore};
use fitserve::{create_app, ApiKeyValidator, AppState, RateLimiter, UsageLogger};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().context("failed to load settings")?;
    settings
        .validate_all()
        .map_err(|e| anyhow::anyhow!("invalid settings: {e}"))?;

    let db_pool = fitserve::db::create_pool(&settings).await?;
    tracing::info!("database pool ready, migrations applied");

    let cache_store: Arc<dyn CacheStore> = if settings.cache.enabled {
        match RedisStore::connect(&settings.cache.redis_url).await {
            Ok(store) => {
                tracing::info!("connected to Redis");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!("Redis unavailable, falling back to in-memory cache: {:#}", e);
                Arc::new(MemoryStore::new())
            }
        }
    } else {
        Arc::new(MemoryStore::new())
    };
    let cache = Cache::new(cache_store);

    let store = Arc::new(PostgresStore::new(db_pool.clone()));

    let validator = ApiKeyValidator::new(
        store.clone(),
        cache.clone(),
        settings.cache.validation_ttl_seconds,
    );
    let limiter = RateLimiter::new(
        cache.clone(),
        store.clone(),
        store.clone(),
        settings.cache.monthly_count_ttl_seconds,
    );
    let usage = UsageLogger::new(store.clone(), cache.clone());

    spawn_retention_task(
        store.clone(),
        store.clone(),
        settings.retention.usage_days,
        settings.retention.rate_window_days,
        settings.retention.purge_interval_seconds,
    );

    let bind = format!("{}:{}", settings.server.bind_address, settings.server.port);
    let state = AppState {
        db_pool,
        config: settings,
        cache,
        validator,
        limiter,
        usage,
        api_keys: store.clone(),
        subscriptions: store.clone(),
        workouts: store,
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("listening on {}", bind);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn spawn_retention_task(
    usage: Arc<dyn UsageStore>,
    rates: Arc<dyn RateLimitStore>,
    usage_days: i64,
    window_days: i64,
    interval_seconds: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            ticker.tick().await;
            if let Err(e) =
                fitserve::usage::purge_expired(&usage, &rates, usage_days, window_days).await
            {
                tracing::warn!("retention purge failed: {:#}", e);
            }
        }
    });
}
