use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

use super::documents::{sanitize_filename, DocumentStorage};
use super::gate::AccountGate;
use super::models::{
    AccountStatus, AccountView, BillingSummary, Channel, ChannelUsage, CurrentUsage,
    DocumentAttachment, Invoice, InvoiceState, OverdueReport, PageRequest, PeriodStats,
    RecordFilter, SendHistory, TariffConfig,
};
use super::period::{add_business_days, BillingPeriod};
use super::store::{BillingStore, SendRecordStore};
use super::tariff;
use super::usage::UsageAggregator;

/// Reason recorded on the account when the overdue sweep blocks it.
pub const OVERDUE_BLOCK_REASON: &str =
    "Payment overdue. Please settle the outstanding invoice to restore service.";

/// Business days between document upload and payment due date.
pub const PAYMENT_TERMS_BUSINESS_DAYS: u32 = 3;

const GENERATE_ATTEMPTS: usize = 2;

/// key: billing-service -> invoice lifecycle
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    records: Arc<dyn SendRecordStore>,
    documents: Arc<dyn DocumentStorage>,
    aggregator: UsageAggregator,
    tariff: Arc<TariffConfig>,
    gate: AccountGate,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        records: Arc<dyn SendRecordStore>,
        documents: Arc<dyn DocumentStorage>,
        tariff: Arc<TariffConfig>,
    ) -> Self {
        let gate = AccountGate::new(store.clone());
        Self {
            aggregator: UsageAggregator::new(records.clone()),
            store,
            records,
            documents,
            tariff,
            gate,
        }
    }

    pub fn gate(&self) -> &AccountGate {
        &self.gate
    }

    pub fn tariff(&self) -> &TariffConfig {
        &self.tariff
    }

    /// Bills `period`, defaulting to the month before `now`.
    ///
    /// A `draft` invoice (one whose document was removed) is re-priced in place;
    /// any other existing invoice is reported back through `AlreadyGenerated`.
    pub async fn generate(
        &self,
        period: Option<BillingPeriod>,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let period = period.unwrap_or_else(|| BillingPeriod::previous_to(now));

        if let Some(existing) = self.store.invoice_by_period(period).await? {
            if existing.state != InvoiceState::Draft {
                return Err(BillingError::AlreadyGenerated(Box::new(existing)));
            }
        }

        let snapshot = self.aggregator.aggregate(period).await?;
        let costs = tariff::price(&snapshot, &self.tariff);
        let invoice = Invoice::generated(&snapshot, &costs, now);

        for _ in 0..GENERATE_ATTEMPTS {
            if self.store.insert_invoice(&invoice).await? {
                info!(
                    %period,
                    invoice = %invoice.id,
                    chat_sent = snapshot.chat_sent_count,
                    mail_recipients = snapshot.mail_recipient_count,
                    total_cost_cents = invoice.total_cost_cents,
                    "invoice generated"
                );
                return Ok(invoice);
            }

            if let Some(regenerated) = self.store.regenerate_draft(&invoice).await? {
                info!(
                    %period,
                    invoice = %regenerated.id,
                    total_cost_cents = regenerated.total_cost_cents,
                    "draft invoice regenerated"
                );
                return Ok(regenerated);
            }

            if let Some(existing) = self.store.invoice_by_period(period).await? {
                return Err(BillingError::AlreadyGenerated(Box::new(existing)));
            }
        }

        // The period flipped between present and absent on every attempt.
        Err(BillingError::Store(sqlx::Error::RowNotFound))
    }

    /// Stores the invoice document and starts the payment clock.
    pub async fn attach_document(
        &self,
        invoice_id: Uuid,
        document: &[u8],
        filename: Option<&str>,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let invoice = self
            .store
            .invoice_by_id(invoice_id)
            .await?
            .ok_or(BillingError::NotFound)?;
        if invoice.state == InvoiceState::Draft {
            return Err(BillingError::NotGenerated);
        }

        let filename = sanitize_filename(filename, invoice.period);
        let document_ref = self.documents.put(invoice.period, &filename, document).await?;
        let attachment = DocumentAttachment {
            document_ref,
            filename,
            uploaded_at: now,
            payment_due_at: add_business_days(now, PAYMENT_TERMS_BUSINESS_DAYS),
        };

        let Some(updated) = self.store.attach_document(invoice_id, &attachment).await? else {
            self.discard_document(&attachment.document_ref).await;
            return Err(match self.store.invoice_by_id(invoice_id).await? {
                Some(_) => BillingError::NotGenerated,
                None => BillingError::NotFound,
            });
        };

        if let Some(previous) = invoice
            .document_ref
            .as_deref()
            .filter(|previous| *previous != attachment.document_ref)
        {
            self.discard_document(previous).await;
        }

        info!(
            period = %updated.period,
            invoice = %updated.id,
            payment_due_at = ?updated.payment_due_at,
            "invoice document attached"
        );
        Ok(updated)
    }

    /// Drops the document and its due date; an `invoiced` invoice returns to `draft`.
    pub async fn remove_document(
        &self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let invoice = self
            .store
            .invoice_by_id(invoice_id)
            .await?
            .ok_or(BillingError::NotFound)?;
        if invoice.payment_received {
            return Err(BillingError::AlreadyPaid);
        }

        let Some(updated) = self.store.clear_document(invoice_id, now).await? else {
            return Err(match self.store.invoice_by_id(invoice_id).await? {
                Some(_) => BillingError::AlreadyPaid,
                None => BillingError::NotFound,
            });
        };

        if let Some(document_ref) = invoice.document_ref.as_deref() {
            self.discard_document(document_ref).await;
        }

        info!(
            period = %updated.period,
            invoice = %updated.id,
            state = updated.state.as_str(),
            "invoice document removed"
        );
        Ok(updated)
    }

    /// Records payment for `period` and reactivates the account.
    ///
    /// The account is unblocked even when other periods are still overdue.
    pub async fn confirm_payment(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let invoice = self
            .store
            .mark_paid(period, now)
            .await?
            .ok_or(BillingError::NotFound)?;
        info!(%period, invoice = %invoice.id, "invoice payment received");

        self.gate.unblock(now).await?;

        let still_overdue = self.store.count_unpaid_overdue().await?;
        if still_overdue > 0 {
            warn!(
                %period,
                still_overdue,
                "account unblocked while other invoices remain overdue"
            );
        }
        Ok(invoice)
    }

    /// Hard-deletes an invoice that has neither a document nor a payment.
    pub async fn reverse(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        let invoice = self
            .store
            .invoice_by_period(period)
            .await?
            .ok_or(BillingError::NotFound)?;
        reversal_guard(&invoice)?;

        let Some(deleted) = self.store.delete_reversible(period).await? else {
            return Err(match self.store.invoice_by_period(period).await? {
                Some(current) => reversal_guard(&current)
                    .err()
                    .unwrap_or(BillingError::NotFound),
                None => BillingError::NotFound,
            });
        };
        info!(%period, invoice = %deleted.id, "invoice reversed");

        match self.store.count_unpaid_overdue().await {
            Ok(0) => {
                if let Err(err) = self.gate.unblock(now).await {
                    warn!(?err, %period, "failed to unblock account after reversal");
                }
            }
            Ok(remaining) => debug!(%period, remaining, "overdue invoices remain after reversal"),
            Err(err) => warn!(?err, %period, "failed to check overdue invoices after reversal"),
        }

        Ok(deleted)
    }

    /// Flags every documented, unpaid invoice whose due date passed and blocks the account.
    pub async fn reconcile_overdue(&self, now: DateTime<Utc>) -> BillingResult<OverdueReport> {
        let candidates = self.store.overdue_candidates(now).await?;
        let mut invoices = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.store.mark_overdue(candidate.id, now).await? {
                Some(invoice) => {
                    if candidate.state != InvoiceState::Overdue {
                        info!(
                            period = %invoice.period,
                            invoice = %invoice.id,
                            payment_due_at = ?invoice.payment_due_at,
                            "invoice marked overdue"
                        );
                    }
                    invoices.push(invoice);
                }
                None => debug!(
                    period = %candidate.period,
                    invoice = %candidate.id,
                    "invoice settled during overdue sweep"
                ),
            }
        }

        let account_blocked = !invoices.is_empty();
        if account_blocked {
            self.gate.block(OVERDUE_BLOCK_REASON, now).await?;
        }

        Ok(OverdueReport {
            evaluated_at: now,
            count: invoices.len(),
            invoices,
            account_blocked,
        })
    }

    pub async fn current_usage(&self, now: DateTime<Utc>) -> BillingResult<CurrentUsage> {
        let snapshot = self
            .aggregator
            .aggregate(BillingPeriod::containing(now))
            .await?;
        Ok(CurrentUsage {
            period: snapshot.billing_period,
            chat: ChannelUsage::new(snapshot.chat_sent_count, self.tariff.chat_free_units),
            mail: ChannelUsage::new(snapshot.mail_recipient_count, self.tariff.mail_free_units),
        })
    }

    pub async fn account_status(&self, now: DateTime<Utc>) -> BillingResult<AccountStatus> {
        Ok(self.gate.status(now).await?)
    }

    pub async fn invoices(&self) -> BillingResult<Vec<Invoice>> {
        Ok(self.store.list_invoices().await?)
    }

    pub async fn invoice(&self, period: BillingPeriod) -> BillingResult<Invoice> {
        self.store
            .invoice_by_period(period)
            .await?
            .ok_or(BillingError::NotFound)
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> BillingResult<BillingSummary> {
        let usage = self.current_usage(now).await?;
        let status = self.gate.status(now).await?;
        let last_invoice = self
            .store
            .list_invoices()
            .await?
            .first()
            .map(Invoice::summary);
        Ok(BillingSummary {
            usage,
            account: AccountView::from(&status),
            last_invoice,
        })
    }

    pub async fn period_stats(&self, period: BillingPeriod) -> BillingResult<PeriodStats> {
        Ok(PeriodStats {
            period,
            chat: self.records.outcome_tallies(Channel::Chat, period).await?,
            mail: self.records.outcome_tallies(Channel::Mail, period).await?,
            invoice: self.store.invoice_by_period(period).await?,
        })
    }

    /// Send history of one channel, newest first.
    pub async fn send_history(
        &self,
        channel: Channel,
        filter: RecordFilter,
        page: PageRequest,
    ) -> BillingResult<SendHistory> {
        Ok(self.records.list_records(channel, filter, page).await?)
    }

    async fn discard_document(&self, document_ref: &str) {
        if let Err(err) = self.documents.remove(document_ref).await {
            warn!(?err, document = %document_ref, "failed to remove invoice document");
        }
    }
}

fn reversal_guard(invoice: &Invoice) -> BillingResult<()> {
    if invoice.payment_received {
        return Err(BillingError::AlreadyPaid);
    }
    if invoice.document_present {
        return Err(BillingError::AlreadyUploaded);
    }
    Ok(())
}
