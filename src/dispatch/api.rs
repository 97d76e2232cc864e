use axum::{extract::Extension, Json};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{success, AppError, AppResult, Success};
use crate::extractor::ApiKey;

use super::{Dispatcher, SendReport};

const MAX_CHAT_MESSAGE_CHARS: usize = 4096;
const MIN_PHONE_CHARS: usize = 10;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"));

#[derive(Debug, Deserialize)]
pub struct SendChatRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMultipleMailRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// key: dispatch-api -> send endpoints
pub async fn send_chat(
    _key: ApiKey,
    Extension(dispatcher): Extension<Dispatcher>,
    Json(payload): Json<SendChatRequest>,
) -> AppResult<Json<Success<SendReport>>> {
    let to = payload.to.trim();
    if to.chars().count() < MIN_PHONE_CHARS {
        return Err(AppError::BadRequest("invalid phone number".into()));
    }
    let length = payload.message.chars().count();
    if length == 0 {
        return Err(AppError::BadRequest("message must not be empty".into()));
    }
    if length > MAX_CHAT_MESSAGE_CHARS {
        return Err(AppError::BadRequest("message is too long".into()));
    }

    let report = dispatcher
        .send_chat(to, &payload.message, Utc::now())
        .await?;
    Ok(success(report))
}

pub async fn send_mail(
    _key: ApiKey,
    Extension(dispatcher): Extension<Dispatcher>,
    Json(payload): Json<SendMailRequest>,
) -> AppResult<Json<Success<SendReport>>> {
    let to = validate_email(&payload.to)?;
    validate_content(&payload.subject, &payload.html)?;

    let report = dispatcher
        .send_mail(to, &payload.subject, &payload.html, Utc::now())
        .await?;
    Ok(success(report))
}

pub async fn send_mail_multiple(
    _key: ApiKey,
    Extension(dispatcher): Extension<Dispatcher>,
    Json(payload): Json<SendMultipleMailRequest>,
) -> AppResult<Json<Success<SendReport>>> {
    if payload.to.is_empty() {
        return Err(AppError::BadRequest(
            "at least one recipient is required".into(),
        ));
    }
    let recipients = payload
        .to
        .iter()
        .map(|address| validate_email(address).map(str::to_string))
        .collect::<AppResult<Vec<_>>>()?;
    validate_content(&payload.subject, &payload.html)?;

    let report = dispatcher
        .send_mail_multiple(recipients, &payload.subject, &payload.html, Utc::now())
        .await?;
    Ok(success(report))
}

fn validate_email(raw: &str) -> AppResult<&str> {
    let address = raw.trim();
    if EMAIL_PATTERN.is_match(address) {
        Ok(address)
    } else {
        Err(AppError::BadRequest(format!("invalid email `{address}`")))
    }
}

fn validate_content(subject: &str, html: &str) -> AppResult<()> {
    if subject.trim().is_empty() {
        return Err(AppError::BadRequest("subject must not be empty".into()));
    }
    if html.trim().is_empty() {
        return Err(AppError::BadRequest("html must not be empty".into()));
    }
    Ok(())
}
