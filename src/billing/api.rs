use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{success, AppError, AppResult, Success};
use crate::extractor::ApiKey;

use super::{
    AccountView, BillingPeriod, BillingService, BillingSummary, Channel, CurrentUsage, Invoice,
    InvoiceSummary, PageRequest, PeriodStats, RecordFilter, SendHistory, SendOutcome,
};

/// key: billing-api -> stats and invoice endpoints
pub async fn current_usage(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
) -> AppResult<Json<Success<CurrentUsage>>> {
    Ok(success(service.current_usage(Utc::now()).await?))
}

pub async fn summary(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
) -> AppResult<Json<Success<BillingSummary>>> {
    Ok(success(service.summary(Utc::now()).await?))
}

pub async fn account_status(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
) -> AppResult<Json<Success<AccountView>>> {
    let status = service.account_status(Utc::now()).await?;
    Ok(success(AccountView::from(&status)))
}

pub async fn billing_history(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
) -> AppResult<Json<Success<Vec<Invoice>>>> {
    Ok(success(service.invoices().await?))
}

pub async fn period_stats(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Path(period): Path<String>,
) -> AppResult<Json<Success<PeriodStats>>> {
    let period: BillingPeriod = period.parse()?;
    Ok(success(service.period_stats(period).await?))
}

pub async fn generate_invoice(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    body: Bytes,
) -> AppResult<Json<Success<Invoice>>> {
    let period = parse_generate_request(&body)?
        .period
        .map(|raw| raw.parse::<BillingPeriod>())
        .transpose()?;
    Ok(success(service.generate(period, Utc::now()).await?))
}

pub async fn chat_history(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Success<SendHistory>>> {
    let (filter, page) = query.into_parts()?;
    Ok(success(service.send_history(Channel::Chat, filter, page).await?))
}

pub async fn mail_history(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Success<SendHistory>>> {
    let (filter, page) = query.into_parts()?;
    Ok(success(service.send_history(Channel::Mail, filter, page).await?))
}

pub async fn upload_invoice(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Json(payload): Json<UploadInvoiceRequest>,
) -> AppResult<Json<Success<InvoiceSummary>>> {
    let invoice_id = parse_invoice_id(&payload.invoice_id)?;
    let document = decode_document(&payload.base64)?;
    let invoice = service
        .attach_document(
            invoice_id,
            &document,
            payload.filename.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(success(invoice.summary()))
}

pub async fn remove_invoice_file(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Path(invoice_id): Path<String>,
) -> AppResult<Json<Success<InvoiceSummary>>> {
    let invoice_id = parse_invoice_id(&invoice_id)?;
    let invoice = service.remove_document(invoice_id, Utc::now()).await?;
    Ok(success(invoice.summary()))
}

pub async fn confirm_payment(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Path(period): Path<String>,
) -> AppResult<Json<Success<Invoice>>> {
    let period: BillingPeriod = period.parse()?;
    Ok(success(service.confirm_payment(period, Utc::now()).await?))
}

pub async fn reverse_invoice(
    _key: ApiKey,
    Extension(service): Extension<BillingService>,
    Path(period): Path<String>,
) -> AppResult<Json<Success<Invoice>>> {
    let period: BillingPeriod = period.parse()?;
    Ok(success(service.reverse(period, Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateInvoiceRequest {
    #[serde(default)]
    pub period: Option<String>,
}

/// An empty body bills the previous month; anything else must be a valid request.
fn parse_generate_request(body: &[u8]) -> AppResult<GenerateInvoiceRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(GenerateInvoiceRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::BadRequest(format!("invalid generate request: {err}")))
}

/// Query string of the send-history listings.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub month: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    fn into_parts(self) -> AppResult<(RecordFilter, PageRequest)> {
        let period = self
            .month
            .map(|raw| raw.parse::<BillingPeriod>())
            .transpose()?;
        let outcome = self
            .status
            .map(|raw| {
                SendOutcome::parse(raw.trim())
                    .ok_or_else(|| AppError::BadRequest(format!("unknown status `{raw}`")))
            })
            .transpose()?;
        Ok((
            RecordFilter { period, outcome },
            PageRequest::new(self.page, self.limit),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInvoiceRequest {
    #[serde(alias = "invoice_id")]
    pub invoice_id: String,
    pub base64: String,
    #[serde(default)]
    pub filename: Option<String>,
}

fn parse_invoice_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("invalid invoice id `{raw}`")))
}

/// Decodes a standard base64 payload, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_document(raw: &str) -> AppResult<Vec<u8>> {
    let trimmed = raw.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| AppError::BadRequest("malformed data url".into()))?,
        None => trimmed,
    };
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| AppError::BadRequest(format!("invalid base64 document: {err}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("empty document".into()));
    }
    Ok(bytes)
}
