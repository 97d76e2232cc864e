use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    AccountStatus, Channel, DocumentAttachment, Invoice, InvoiceState, NewSendRecord,
    OutcomeTally, PageRequest, Pagination, RecordFilter, SendHistory, SendOutcome, SendRecord,
};
use super::period::BillingPeriod;
use super::store::{BillingStore, SendRecordStore};

#[derive(Debug, Default)]
struct MemoryState {
    invoices: HashMap<Uuid, Invoice>,
    account: Option<AccountStatus>,
    records: Vec<SendRecord>,
}

impl MemoryState {
    fn by_period_mut(&mut self, period: BillingPeriod) -> Option<&mut Invoice> {
        self.invoices.values_mut().find(|invoice| invoice.period == period)
    }
}

/// In-memory store for tests and local development. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a send record with a terminal outcome, bypassing the send path.
    pub async fn seed_record(
        &self,
        channel: Channel,
        period: BillingPeriod,
        outcome: SendOutcome,
        recipient_count: i32,
    ) -> SendRecord {
        self.seed_record_at(channel, period, outcome, recipient_count, Utc::now())
            .await
    }

    pub async fn seed_record_at(
        &self,
        channel: Channel,
        period: BillingPeriod,
        outcome: SendOutcome,
        recipient_count: i32,
        now: DateTime<Utc>,
    ) -> SendRecord {
        let record = SendRecord {
            id: Uuid::new_v4(),
            channel,
            billing_period: period,
            outcome,
            recipient_count,
            error: None,
            created_at: now,
            completed_at: (outcome != SendOutcome::Pending).then_some(now),
        };
        self.state.lock().await.records.push(record.clone());
        record
    }
}

#[async_trait]
impl SendRecordStore for InMemoryBillingStore {
    async fn find_sent(
        &self,
        channel: Channel,
        period: BillingPeriod,
    ) -> sqlx::Result<Vec<SendRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| {
                r.channel == channel && r.billing_period == period && r.outcome == SendOutcome::Sent
            })
            .cloned()
            .collect())
    }

    async fn count_sent(&self, channel: Channel, period: BillingPeriod) -> sqlx::Result<i64> {
        Ok(self.find_sent(channel, period).await?.len() as i64)
    }

    async fn outcome_tallies(
        &self,
        channel: Channel,
        period: BillingPeriod,
    ) -> sqlx::Result<Vec<OutcomeTally>> {
        let state = self.state.lock().await;
        let mut tallies: Vec<OutcomeTally> = Vec::new();
        for record in state
            .records
            .iter()
            .filter(|r| r.channel == channel && r.billing_period == period)
        {
            match tallies.iter_mut().find(|t| t.outcome == record.outcome) {
                Some(tally) => {
                    tally.records += 1;
                    tally.recipients += i64::from(record.recipient_count);
                }
                None => tallies.push(OutcomeTally {
                    outcome: record.outcome,
                    records: 1,
                    recipients: i64::from(record.recipient_count),
                }),
            }
        }
        tallies.sort_by_key(|t| t.outcome.as_str());
        Ok(tallies)
    }

    async fn list_records(
        &self,
        channel: Channel,
        filter: RecordFilter,
        page: PageRequest,
    ) -> sqlx::Result<SendHistory> {
        let state = self.state.lock().await;
        let mut matching: Vec<&SendRecord> = state
            .records
            .iter()
            .rev()
            .filter(|r| r.channel == channel && filter.matches(r))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let records = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok(SendHistory {
            records,
            pagination: Pagination::new(total, page),
        })
    }

    async fn record_attempt(&self, record: NewSendRecord) -> sqlx::Result<SendRecord> {
        let stored = SendRecord {
            id: Uuid::new_v4(),
            channel: record.channel,
            billing_period: record.billing_period,
            outcome: SendOutcome::Pending,
            recipient_count: record.recipient_count,
            error: None,
            created_at: record.created_at,
            completed_at: None,
        };
        self.state.lock().await.records.push(stored.clone());
        Ok(stored)
    }

    async fn complete_attempt(
        &self,
        id: Uuid,
        outcome: SendOutcome,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<SendRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state
            .records
            .iter_mut()
            .find(|r| r.id == id && r.outcome == SendOutcome::Pending)
        else {
            return Ok(None);
        };
        record.outcome = outcome;
        record.error = error;
        record.completed_at = Some(completed_at);
        Ok(Some(record.clone()))
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> sqlx::Result<bool> {
        let mut state = self.state.lock().await;
        if state.invoices.values().any(|i| i.period == invoice.period) {
            return Ok(false);
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(true)
    }

    async fn regenerate_draft(&self, invoice: &Invoice) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.by_period_mut(invoice.period) else {
            return Ok(None);
        };
        if existing.state != InvoiceState::Draft {
            return Ok(None);
        }
        existing.chat_sent_count = invoice.chat_sent_count;
        existing.mail_recipient_count = invoice.mail_recipient_count;
        existing.chat_overage_units = invoice.chat_overage_units;
        existing.mail_overage_units = invoice.mail_overage_units;
        existing.base_plan_cost_cents = invoice.base_plan_cost_cents;
        existing.chat_overage_cost_cents = invoice.chat_overage_cost_cents;
        existing.mail_overage_cost_cents = invoice.mail_overage_cost_cents;
        existing.total_cost_cents = invoice.total_cost_cents;
        existing.state = InvoiceState::Invoiced;
        existing.generated_at = invoice.generated_at;
        existing.updated_at = invoice.updated_at;
        Ok(Some(existing.clone()))
    }

    async fn invoice_by_id(&self, id: Uuid) -> sqlx::Result<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn invoice_by_period(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state.invoices.values().find(|i| i.period == period).cloned())
    }

    async fn list_invoices(&self) -> sqlx::Result<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| b.period.cmp(&a.period));
        Ok(invoices)
    }

    async fn attach_document(
        &self,
        id: Uuid,
        attachment: &DocumentAttachment,
    ) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(None);
        };
        if invoice.state == InvoiceState::Draft {
            return Ok(None);
        }
        invoice.document_present = true;
        invoice.document_ref = Some(attachment.document_ref.clone());
        invoice.document_filename = Some(attachment.filename.clone());
        invoice.document_uploaded_at = Some(attachment.uploaded_at);
        invoice.payment_due_at = Some(attachment.payment_due_at);
        invoice.updated_at = attachment.uploaded_at;
        Ok(Some(invoice.clone()))
    }

    async fn clear_document(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(None);
        };
        if invoice.payment_received {
            return Ok(None);
        }
        invoice.document_present = false;
        invoice.document_ref = None;
        invoice.document_filename = None;
        invoice.document_uploaded_at = None;
        invoice.payment_due_at = None;
        if invoice.state == InvoiceState::Invoiced {
            invoice.state = InvoiceState::Draft;
        }
        invoice.updated_at = now;
        Ok(Some(invoice.clone()))
    }

    async fn mark_paid(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.by_period_mut(period) else {
            return Ok(None);
        };
        invoice.payment_received = true;
        invoice.payment_received_at = Some(now);
        invoice.state = InvoiceState::Paid;
        invoice.updated_at = now;
        Ok(Some(invoice.clone()))
    }

    async fn delete_reversible(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let id = state
            .invoices
            .values()
            .find(|i| i.period == period && i.is_reversible())
            .map(|i| i.id);
        Ok(id.and_then(|id| state.invoices.remove(&id)))
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> sqlx::Result<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.is_past_due(now))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.period.cmp(&b.period));
        Ok(invoices)
    }

    async fn mark_overdue(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<Option<Invoice>> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoices.get_mut(&id) else {
            return Ok(None);
        };
        if invoice.payment_received || invoice.state == InvoiceState::Paid {
            return Ok(None);
        }
        if invoice.state != InvoiceState::Overdue {
            invoice.state = InvoiceState::Overdue;
            invoice.updated_at = now;
        }
        Ok(Some(invoice.clone()))
    }

    async fn count_unpaid_overdue(&self) -> sqlx::Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|i| i.state == InvoiceState::Overdue && !i.payment_received)
            .count() as i64)
    }

    async fn account_status(&self, now: DateTime<Utc>) -> sqlx::Result<AccountStatus> {
        let mut state = self.state.lock().await;
        Ok(state
            .account
            .get_or_insert_with(|| AccountStatus::active(now))
            .clone())
    }

    async fn save_account_status(&self, status: &AccountStatus) -> sqlx::Result<()> {
        self.state.lock().await.account = Some(status.clone());
        Ok(())
    }
}
