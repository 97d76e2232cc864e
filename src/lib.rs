pub mod billing;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod rate_limit;
pub mod routes;
pub mod telemetry;

use axum::{extract::DefaultBodyLimit, Extension, Router};

use billing::BillingService;
use dispatch::Dispatcher;
use extractor::ApiKeyConfig;
use rate_limit::ApiRateLimiter;

/// Base64-encoded invoice documents travel inside JSON bodies.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Health and API routes with their shared state installed.
pub fn app(
    service: BillingService,
    dispatcher: Dispatcher,
    api_key: ApiKeyConfig,
    limiter: ApiRateLimiter,
) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::api_routes(limiter))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(service))
        .layer(Extension(dispatcher))
        .layer(Extension(api_key))
}
