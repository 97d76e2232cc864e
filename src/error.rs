use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::billing::{Invoice, PeriodParseError};

/// Failures of the billing lifecycle operations.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invoice not found")]
    NotFound,
    #[error("invoice for {} was already generated", .0.period)]
    AlreadyGenerated(Box<Invoice>),
    #[error("invoice document already uploaded; remove it first")]
    AlreadyUploaded,
    #[error("invoice already paid")]
    AlreadyPaid,
    #[error("invoice has not been generated")]
    NotGenerated,
    #[error("billing store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("document storage error: {0}")]
    Document(#[from] std::io::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

/// Failures of the outbound send path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("account blocked")]
    AccountBlocked { reason: Option<String> },
    #[error("delivery failed after {attempts} attempt(s): {message}")]
    Delivery { attempts: u32, message: String },
    #[error("send record store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Period(#[from] PeriodParseError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("too many requests, please try again later")]
    TooManyRequests { retry_after_secs: u64 },
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Billing(BillingError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Billing(
                BillingError::AlreadyGenerated(_)
                | BillingError::AlreadyUploaded
                | BillingError::AlreadyPaid
                | BillingError::NotGenerated,
            ) => StatusCode::CONFLICT,
            AppError::Dispatch(DispatchError::AccountBlocked { .. }) => StatusCode::FORBIDDEN,
            AppError::Dispatch(DispatchError::Delivery { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Period(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Billing(BillingError::Store(_) | BillingError::Document(_))
            | AppError::Dispatch(DispatchError::Store(_))
            | AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self, %status, "request rejected");
        }

        let body = match &self {
            AppError::Dispatch(DispatchError::AccountBlocked { reason }) => json!({
                "success": false,
                "error": "account blocked",
                "reason": reason,
            }),
            AppError::Billing(BillingError::AlreadyGenerated(invoice)) => json!({
                "success": false,
                "error": self.to_string(),
                "invoice": invoice,
            }),
            AppError::TooManyRequests { retry_after_secs } => json!({
                "success": false,
                "error": self.to_string(),
                "retry_after_secs": retry_after_secs,
            }),
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => json!({
                "success": false,
                "error": "internal error",
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Success body; the counterpart of the `{success:false, error}` rejection.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    pub data: T,
}

pub fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}
