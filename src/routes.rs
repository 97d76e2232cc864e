use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::rate_limit::{rate_limit, ApiRateLimiter};
use crate::{billing, dispatch};

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

/// Unauthenticated liveness routes.
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/health", get(health))
}

/// Authenticated `/api` routes behind the per-client rate limit.
pub fn api_routes(limiter: ApiRateLimiter) -> Router {
    Router::new()
        .route("/api/chat/send", post(dispatch::api::send_chat))
        .route("/api/mail/send", post(dispatch::api::send_mail))
        .route(
            "/api/mail/send-multiple",
            post(dispatch::api::send_mail_multiple),
        )
        .route("/api/stats/usage", get(billing::api::current_usage))
        .route("/api/stats/summary", get(billing::api::summary))
        .route("/api/stats/account", get(billing::api::account_status))
        .route("/api/stats/billing", get(billing::api::billing_history))
        .route("/api/stats/chat", get(billing::api::chat_history))
        .route("/api/stats/mail", get(billing::api::mail_history))
        .route("/api/stats/month/:period", get(billing::api::period_stats))
        .route(
            "/api/stats/invoice/generate",
            post(billing::api::generate_invoice),
        )
        .route(
            "/api/stats/invoice/upload",
            post(billing::api::upload_invoice),
        )
        .route(
            "/api/stats/invoice/file/:invoice_id",
            delete(billing::api::remove_invoice_file),
        )
        .route(
            "/api/stats/invoice/payment/:period",
            post(billing::api::confirm_payment),
        )
        .route(
            "/api/stats/invoice/reverse/:period",
            delete(billing::api::reverse_invoice),
        )
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit))
}
