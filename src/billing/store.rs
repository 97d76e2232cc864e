use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    AccountStatus, Channel, DocumentAttachment, Invoice, NewSendRecord, OutcomeTally, PageRequest,
    RecordFilter, SendHistory, SendOutcome, SendRecord,
};
use super::period::BillingPeriod;

/// key: billing-send-records -> append-only attempt log per channel
#[async_trait]
pub trait SendRecordStore: Send + Sync {
    async fn find_sent(&self, channel: Channel, period: BillingPeriod)
        -> sqlx::Result<Vec<SendRecord>>;
    async fn count_sent(&self, channel: Channel, period: BillingPeriod) -> sqlx::Result<i64>;
    async fn outcome_tallies(
        &self,
        channel: Channel,
        period: BillingPeriod,
    ) -> sqlx::Result<Vec<OutcomeTally>>;
    /// One page of a channel's records, newest first.
    async fn list_records(
        &self,
        channel: Channel,
        filter: RecordFilter,
        page: PageRequest,
    ) -> sqlx::Result<SendHistory>;
    async fn record_attempt(&self, record: NewSendRecord) -> sqlx::Result<SendRecord>;
    /// Moves a `pending` record to its terminal outcome.
    async fn complete_attempt(
        &self,
        id: Uuid,
        outcome: SendOutcome,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<SendRecord>>;
}

/// key: billing-store -> invoices + account singleton
///
/// Every mutating call is a single conditional write so concurrent callers cannot
/// clobber each other; a `None`/`false` return means the condition did not hold.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Inserts unless an invoice for the same period exists.
    async fn insert_invoice(&self, invoice: &Invoice) -> sqlx::Result<bool>;
    /// Overwrites usage and costs of a `draft` invoice and moves it to `invoiced`.
    async fn regenerate_draft(&self, invoice: &Invoice) -> sqlx::Result<Option<Invoice>>;
    async fn invoice_by_id(&self, id: Uuid) -> sqlx::Result<Option<Invoice>>;
    async fn invoice_by_period(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>>;
    /// All invoices, newest period first.
    async fn list_invoices(&self) -> sqlx::Result<Vec<Invoice>>;
    async fn attach_document(
        &self,
        id: Uuid,
        attachment: &DocumentAttachment,
    ) -> sqlx::Result<Option<Invoice>>;
    /// Clears document fields on an unpaid invoice, reverting `invoiced` to `draft`.
    async fn clear_document(&self, id: Uuid, now: DateTime<Utc>)
        -> sqlx::Result<Option<Invoice>>;
    async fn mark_paid(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Invoice>>;
    /// Deletes the invoice only while it has no document and no payment.
    async fn delete_reversible(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>>;
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> sqlx::Result<Vec<Invoice>>;
    /// Flags an unpaid invoice as `overdue`; already overdue invoices are returned unchanged.
    async fn mark_overdue(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<Option<Invoice>>;
    async fn count_unpaid_overdue(&self) -> sqlx::Result<i64>;

    /// Returns the singleton, creating an active one when absent.
    async fn account_status(&self, now: DateTime<Utc>) -> sqlx::Result<AccountStatus>;
    async fn save_account_status(&self, status: &AccountStatus) -> sqlx::Result<()>;
}
