use axum::{routing::post, Router};

use crate::handlers;
use crate::AppState;

/// Webhook intake sits outside the admission pipeline; it is authenticated
/// by the HMAC signature, not by API keys.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhooks/payment", post(handlers::webhooks::payment))
}
