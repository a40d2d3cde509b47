use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Uniform success envelope: `{data, pagination?, meta}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub meta: Meta,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Meta {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, request_id: Uuid) -> Self {
        ApiResponse {
            data,
            pagination: None,
            meta: Meta {
                request_id,
                timestamp: Utc::now(),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn with_pagination(mut self, page: i64, per_page: i64, total: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        self.pagination = Some(Pagination {
            page,
            per_page,
            total,
            total_pages,
        });
        self
    }
}
