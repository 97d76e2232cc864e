use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{
    AccountStatus, Channel, DocumentAttachment, Invoice, InvoiceState, NewSendRecord,
    OutcomeTally, PageRequest, Pagination, RecordFilter, SendHistory, SendOutcome, SendRecord,
};
use super::period::BillingPeriod;
use super::store::{BillingStore, SendRecordStore};

/// key: billing-postgres -> sqlx implementation of the billing stores
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_period(row: &PgRow, column: &str) -> sqlx::Result<BillingPeriod> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

fn send_record_from_row(row: &PgRow) -> sqlx::Result<SendRecord> {
    let channel: String = row.try_get("channel")?;
    let channel = Channel::from_str(&channel).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown channel `{channel}`").into())
    })?;
    let outcome: String = row.try_get("outcome")?;
    Ok(SendRecord {
        id: row.try_get("id")?,
        channel,
        billing_period: decode_period(row, "billing_period")?,
        outcome: SendOutcome::from_str(&outcome),
        recipient_count: row.try_get("recipient_count")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn invoice_from_row(row: &PgRow) -> sqlx::Result<Invoice> {
    let state: String = row.try_get("state")?;
    Ok(Invoice {
        id: row.try_get("id")?,
        period: decode_period(row, "period")?,
        chat_sent_count: row.try_get("chat_sent_count")?,
        mail_recipient_count: row.try_get("mail_recipient_count")?,
        chat_overage_units: row.try_get("chat_overage_units")?,
        mail_overage_units: row.try_get("mail_overage_units")?,
        base_plan_cost_cents: row.try_get("base_plan_cost_cents")?,
        chat_overage_cost_cents: row.try_get("chat_overage_cost_cents")?,
        mail_overage_cost_cents: row.try_get("mail_overage_cost_cents")?,
        total_cost_cents: row.try_get("total_cost_cents")?,
        state: InvoiceState::from_str(&state),
        generated_at: row.try_get("generated_at")?,
        document_present: row.try_get("document_present")?,
        document_ref: row.try_get("document_ref")?,
        document_filename: row.try_get("document_filename")?,
        document_uploaded_at: row.try_get("document_uploaded_at")?,
        payment_due_at: row.try_get("payment_due_at")?,
        payment_received: row.try_get("payment_received")?,
        payment_received_at: row.try_get("payment_received_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> sqlx::Result<AccountStatus> {
    Ok(AccountStatus {
        is_active: row.try_get("is_active")?,
        blocked_reason: row.try_get("blocked_reason")?,
        blocked_at: row.try_get("blocked_at")?,
        channel_connected: row.try_get("channel_connected")?,
        channel_checked_at: row.try_get("channel_checked_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn optional_invoice(row: Option<PgRow>) -> sqlx::Result<Option<Invoice>> {
    row.as_ref().map(invoice_from_row).transpose()
}

#[async_trait]
impl SendRecordStore for PgBillingStore {
    async fn find_sent(
        &self,
        channel: Channel,
        period: BillingPeriod,
    ) -> sqlx::Result<Vec<SendRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM send_records
            WHERE channel = $1 AND billing_period = $2 AND outcome = 'sent'
            ORDER BY created_at
            "#,
        )
        .bind(channel.as_str())
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(send_record_from_row).collect()
    }

    async fn count_sent(&self, channel: Channel, period: BillingPeriod) -> sqlx::Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM send_records WHERE channel = $1 AND billing_period = $2 AND outcome = 'sent'",
        )
        .bind(channel.as_str())
        .bind(period.to_string())
        .fetch_one(&self.pool)
        .await
    }

    async fn outcome_tallies(
        &self,
        channel: Channel,
        period: BillingPeriod,
    ) -> sqlx::Result<Vec<OutcomeTally>> {
        let rows = sqlx::query(
            r#"
            SELECT
                outcome,
                COUNT(*) AS records,
                COALESCE(SUM(recipient_count), 0)::BIGINT AS recipients
            FROM send_records
            WHERE channel = $1 AND billing_period = $2
            GROUP BY outcome
            ORDER BY outcome
            "#,
        )
        .bind(channel.as_str())
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let outcome: String = row.try_get("outcome")?;
                Ok(OutcomeTally {
                    outcome: SendOutcome::from_str(&outcome),
                    records: row.try_get("records")?,
                    recipients: row.try_get("recipients")?,
                })
            })
            .collect()
    }

    async fn list_records(
        &self,
        channel: Channel,
        filter: RecordFilter,
        page: PageRequest,
    ) -> sqlx::Result<SendHistory> {
        let period = filter.period.map(|period| period.to_string());
        let outcome = filter.outcome.map(|outcome| outcome.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM send_records
            WHERE channel = $1
              AND ($2::TEXT IS NULL OR billing_period = $2)
              AND ($3::TEXT IS NULL OR outcome = $3)
            "#,
        )
        .bind(channel.as_str())
        .bind(period.as_deref())
        .bind(outcome)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM send_records
            WHERE channel = $1
              AND ($2::TEXT IS NULL OR billing_period = $2)
              AND ($3::TEXT IS NULL OR outcome = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(channel.as_str())
        .bind(period.as_deref())
        .bind(outcome)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(SendHistory {
            records: rows
                .iter()
                .map(send_record_from_row)
                .collect::<sqlx::Result<_>>()?,
            pagination: Pagination::new(total, page),
        })
    }

    async fn record_attempt(&self, record: NewSendRecord) -> sqlx::Result<SendRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO send_records (id, channel, billing_period, outcome, recipient_count, created_at)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.channel.as_str())
        .bind(record.billing_period.to_string())
        .bind(record.recipient_count)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        send_record_from_row(&row)
    }

    async fn complete_attempt(
        &self,
        id: Uuid,
        outcome: SendOutcome,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<SendRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE send_records
            SET outcome = $2, error = $3, completed_at = $4
            WHERE id = $1 AND outcome = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome.as_str())
        .bind(error)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(send_record_from_row).transpose()
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_invoices (
                id,
                period,
                chat_sent_count,
                mail_recipient_count,
                chat_overage_units,
                mail_overage_units,
                base_plan_cost_cents,
                chat_overage_cost_cents,
                mail_overage_cost_cents,
                total_cost_cents,
                state,
                generated_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (period) DO NOTHING
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.period.to_string())
        .bind(invoice.chat_sent_count)
        .bind(invoice.mail_recipient_count)
        .bind(invoice.chat_overage_units)
        .bind(invoice.mail_overage_units)
        .bind(invoice.base_plan_cost_cents)
        .bind(invoice.chat_overage_cost_cents)
        .bind(invoice.mail_overage_cost_cents)
        .bind(invoice.total_cost_cents)
        .bind(invoice.state.as_str())
        .bind(invoice.generated_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn regenerate_draft(&self, invoice: &Invoice) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_invoices
            SET
                chat_sent_count = $2,
                mail_recipient_count = $3,
                chat_overage_units = $4,
                mail_overage_units = $5,
                base_plan_cost_cents = $6,
                chat_overage_cost_cents = $7,
                mail_overage_cost_cents = $8,
                total_cost_cents = $9,
                state = 'invoiced',
                generated_at = $10,
                updated_at = $10
            WHERE period = $1 AND state = 'draft'
            RETURNING *
            "#,
        )
        .bind(invoice.period.to_string())
        .bind(invoice.chat_sent_count)
        .bind(invoice.mail_recipient_count)
        .bind(invoice.chat_overage_units)
        .bind(invoice.mail_overage_units)
        .bind(invoice.base_plan_cost_cents)
        .bind(invoice.chat_overage_cost_cents)
        .bind(invoice.mail_overage_cost_cents)
        .bind(invoice.total_cost_cents)
        .bind(invoice.generated_at)
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn invoice_by_id(&self, id: Uuid) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query("SELECT * FROM billing_invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        optional_invoice(row)
    }

    async fn invoice_by_period(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query("SELECT * FROM billing_invoices WHERE period = $1")
            .bind(period.to_string())
            .fetch_optional(&self.pool)
            .await?;
        optional_invoice(row)
    }

    async fn list_invoices(&self) -> sqlx::Result<Vec<Invoice>> {
        let rows = sqlx::query("SELECT * FROM billing_invoices ORDER BY period DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn attach_document(
        &self,
        id: Uuid,
        attachment: &DocumentAttachment,
    ) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_invoices
            SET
                document_present = TRUE,
                document_ref = $2,
                document_filename = $3,
                document_uploaded_at = $4,
                payment_due_at = $5,
                updated_at = $4
            WHERE id = $1 AND state <> 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&attachment.document_ref)
        .bind(&attachment.filename)
        .bind(attachment.uploaded_at)
        .bind(attachment.payment_due_at)
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn clear_document(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_invoices
            SET
                document_present = FALSE,
                document_ref = NULL,
                document_filename = NULL,
                document_uploaded_at = NULL,
                payment_due_at = NULL,
                state = CASE WHEN state = 'invoiced' THEN 'draft' ELSE state END,
                updated_at = $2
            WHERE id = $1 AND payment_received = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn mark_paid(
        &self,
        period: BillingPeriod,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_invoices
            SET payment_received = TRUE, payment_received_at = $2, state = 'paid', updated_at = $2
            WHERE period = $1
            RETURNING *
            "#,
        )
        .bind(period.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn delete_reversible(&self, period: BillingPeriod) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            DELETE FROM billing_invoices
            WHERE period = $1 AND document_present = FALSE AND payment_received = FALSE
            RETURNING *
            "#,
        )
        .bind(period.to_string())
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> sqlx::Result<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM billing_invoices
            WHERE document_present = TRUE
              AND payment_received = FALSE
              AND payment_due_at < $1
              AND state <> 'paid'
            ORDER BY period
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn mark_overdue(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<Option<Invoice>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_invoices
            SET
                updated_at = CASE WHEN state = 'overdue' THEN updated_at ELSE $2 END,
                state = 'overdue'
            WHERE id = $1 AND payment_received = FALSE AND state <> 'paid'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        optional_invoice(row)
    }

    async fn count_unpaid_overdue(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM billing_invoices WHERE state = 'overdue' AND payment_received = FALSE",
        )
        .fetch_one(&self.pool)
        .await
    }

    async fn account_status(&self, now: DateTime<Utc>) -> sqlx::Result<AccountStatus> {
        sqlx::query(
            "INSERT INTO account_status (id, is_active, updated_at) VALUES (1, TRUE, $1) ON CONFLICT (id) DO NOTHING",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM account_status WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        account_from_row(&row)
    }

    async fn save_account_status(&self, status: &AccountStatus) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_status (
                id,
                is_active,
                blocked_reason,
                blocked_at,
                channel_connected,
                channel_checked_at,
                updated_at
            ) VALUES (1, $1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET
                is_active = EXCLUDED.is_active,
                blocked_reason = EXCLUDED.blocked_reason,
                blocked_at = EXCLUDED.blocked_at,
                channel_connected = EXCLUDED.channel_connected,
                channel_checked_at = EXCLUDED.channel_checked_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(status.is_active)
        .bind(&status.blocked_reason)
        .bind(status.blocked_at)
        .bind(status.channel_connected)
        .bind(status.channel_checked_at)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
