use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::period::BillingPeriod;

/// key: billing-models -> channels,send-records,invoices,account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Chat,
    Mail,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Mail => "mail",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Channel::Chat),
            "mail" => Some(Channel::Mail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    Pending,
    Sent,
    Failed,
}

impl SendOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendOutcome::Pending => "pending",
            SendOutcome::Sent => "sent",
            SendOutcome::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Self {
        Self::parse(value).unwrap_or(SendOutcome::Pending)
    }

    /// Strict counterpart of `from_str` for caller-supplied filters.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SendOutcome::Pending),
            "sent" => Some(SendOutcome::Sent),
            "failed" => Some(SendOutcome::Failed),
            _ => None,
        }
    }
}

/// One attempted outbound send. Only `sent` records count toward usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: Uuid,
    pub channel: Channel,
    pub billing_period: BillingPeriod,
    pub outcome: SendOutcome,
    pub recipient_count: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSendRecord {
    pub channel: Channel,
    pub billing_period: BillingPeriod,
    pub recipient_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Per-outcome tally of a channel's records within one period.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutcomeTally {
    pub outcome: SendOutcome,
    pub records: i64,
    pub recipients: i64,
}

/// Optional narrowing of a send-history listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub period: Option<BillingPeriod>,
    pub outcome: Option<SendOutcome>,
}

impl RecordFilter {
    pub fn matches(&self, record: &SendRecord) -> bool {
        self.period.map_or(true, |period| record.billing_period == period)
            && self.outcome.map_or(true, |outcome| record.outcome == outcome)
    }
}

/// 1-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 200;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: PageRequest) -> Self {
        let limit = i64::from(page.limit);
        Self {
            total,
            page: page.page,
            limit: page.limit,
            pages: (total + limit - 1) / limit,
        }
    }
}

/// Send records newest first, with the total matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct SendHistory {
    pub records: Vec<SendRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub billing_period: BillingPeriod,
    pub chat_sent_count: i64,
    pub mail_recipient_count: i64,
}

/// Tariff loaded once at start-up. Amounts are in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffConfig {
    pub base_plan_cost_cents: i64,
    pub chat_free_units: i64,
    pub mail_free_units: i64,
    pub chat_overage_unit_cost_cents: i64,
    pub mail_overage_unit_cost_cents: i64,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            base_plan_cost_cents: 10_000,
            chat_free_units: 1_000,
            mail_free_units: 500,
            chat_overage_unit_cost_cents: 10,
            mail_overage_unit_cost_cents: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub chat_overage_units: i64,
    pub mail_overage_units: i64,
    pub base_plan_cost_cents: i64,
    pub chat_overage_cost_cents: i64,
    pub mail_overage_cost_cents: i64,
    pub total_cost_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Draft,
    Invoiced,
    Overdue,
    Paid,
}

impl InvoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::Draft => "draft",
            InvoiceState::Invoiced => "invoiced",
            InvoiceState::Overdue => "overdue",
            InvoiceState::Paid => "paid",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "invoiced" => InvoiceState::Invoiced,
            "overdue" => InvoiceState::Overdue,
            "paid" => InvoiceState::Paid,
            _ => InvoiceState::Draft,
        }
    }
}

/// key: billing-invoice-model -> one per billing period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub period: BillingPeriod,
    pub chat_sent_count: i64,
    pub mail_recipient_count: i64,
    pub chat_overage_units: i64,
    pub mail_overage_units: i64,
    pub base_plan_cost_cents: i64,
    pub chat_overage_cost_cents: i64,
    pub mail_overage_cost_cents: i64,
    pub total_cost_cents: i64,
    pub state: InvoiceState,
    pub generated_at: Option<DateTime<Utc>>,
    pub document_present: bool,
    pub document_ref: Option<String>,
    pub document_filename: Option<String>,
    pub document_uploaded_at: Option<DateTime<Utc>>,
    pub payment_due_at: Option<DateTime<Utc>>,
    pub payment_received: bool,
    pub payment_received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Builds a freshly generated invoice from a usage snapshot and its price.
    pub fn generated(
        snapshot: &UsageSnapshot,
        costs: &CostBreakdown,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            period: snapshot.billing_period,
            chat_sent_count: snapshot.chat_sent_count,
            mail_recipient_count: snapshot.mail_recipient_count,
            chat_overage_units: costs.chat_overage_units,
            mail_overage_units: costs.mail_overage_units,
            base_plan_cost_cents: costs.base_plan_cost_cents,
            chat_overage_cost_cents: costs.chat_overage_cost_cents,
            mail_overage_cost_cents: costs.mail_overage_cost_cents,
            total_cost_cents: costs.total_cost_cents,
            state: InvoiceState::Invoiced,
            generated_at: Some(now),
            document_present: false,
            document_ref: None,
            document_filename: None,
            document_uploaded_at: None,
            payment_due_at: None,
            payment_received: false,
            payment_received_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reversal is only allowed before a document is uploaded and before payment.
    pub fn is_reversible(&self) -> bool {
        !self.document_present && !self.payment_received
    }

    /// Unpaid, documented and past its due date as of `now`.
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.document_present
            && !self.payment_received
            && self.state != InvoiceState::Paid
            && self.payment_due_at.map(|due| due < now).unwrap_or(false)
    }

    pub fn summary(&self) -> InvoiceSummary {
        InvoiceSummary {
            id: self.id,
            period: self.period,
            state: self.state,
            total_cost_cents: self.total_cost_cents,
            document_present: self.document_present,
            document_filename: self.document_filename.clone(),
            document_uploaded_at: self.document_uploaded_at,
            payment_due_at: self.payment_due_at,
            payment_received: self.payment_received,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub period: BillingPeriod,
    pub state: InvoiceState,
    pub total_cost_cents: i64,
    pub document_present: bool,
    pub document_filename: Option<String>,
    pub document_uploaded_at: Option<DateTime<Utc>>,
    pub payment_due_at: Option<DateTime<Utc>>,
    pub payment_received: bool,
}

/// Document fields written by an upload.
#[derive(Debug, Clone)]
pub struct DocumentAttachment {
    pub document_ref: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub payment_due_at: DateTime<Utc>,
}

/// key: billing-account-status -> process-wide singleton
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub is_active: bool,
    pub blocked_reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub channel_connected: bool,
    pub channel_checked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AccountStatus {
    pub fn active(now: DateTime<Utc>) -> Self {
        Self {
            is_active: true,
            blocked_reason: None,
            blocked_at: None,
            channel_connected: false,
            channel_checked_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelUsage {
    pub sent: i64,
    pub limit: i64,
    pub remaining: i64,
    pub extra: i64,
}

impl ChannelUsage {
    pub fn new(sent: i64, limit: i64) -> Self {
        Self {
            sent,
            limit,
            remaining: (limit - sent).max(0),
            extra: (sent - limit).max(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentUsage {
    pub period: BillingPeriod,
    pub chat: ChannelUsage,
    pub mail: ChannelUsage,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountView {
    pub active: bool,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub channel_connected: bool,
}

impl From<&AccountStatus> for AccountView {
    fn from(status: &AccountStatus) -> Self {
        Self {
            active: status.is_active,
            blocked: !status.is_active,
            blocked_reason: status.blocked_reason.clone(),
            channel_connected: status.channel_connected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingSummary {
    pub usage: CurrentUsage,
    pub account: AccountView,
    pub last_invoice: Option<InvoiceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodStats {
    pub period: BillingPeriod,
    pub chat: Vec<OutcomeTally>,
    pub mail: Vec<OutcomeTally>,
    pub invoice: Option<Invoice>,
}

/// Result of one overdue reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct OverdueReport {
    pub evaluated_at: DateTime<Utc>,
    pub count: usize,
    pub invoices: Vec<Invoice>,
    pub account_blocked: bool,
}
