use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One append-only row per completed request. The monthly quota check
/// counts these rows, so inserts must land even when the response itself
/// already went out.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i32,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub api_key_id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i32,
    pub request_id: Uuid,
}

/// Aggregates over a trailing window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct UsageStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub avg_latency_ms: f64,
}
