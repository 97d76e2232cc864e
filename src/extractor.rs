use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret the `/api/*` routes are protected with, installed as an `Extension`.
#[derive(Clone)]
pub struct ApiKeyConfig {
    key: String,
}

impl ApiKeyConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    fn matches(&self, presented: &str) -> bool {
        !self.key.is_empty() && self.key == presented
    }
}

/// Proof that the request carried the configured `x-api-key`.
pub struct ApiKey;

#[async_trait]
impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<ApiKeyConfig>()
            .ok_or(AppError::Unauthorized)?;
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .ok_or(AppError::Unauthorized)?;
        if config.matches(presented) {
            Ok(ApiKey)
        } else {
            Err(AppError::Unauthorized)
        }
    }
}
