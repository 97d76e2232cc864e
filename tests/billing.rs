use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use relay_billing::billing::{
    BillingPeriod, BillingService, Channel, InMemoryBillingStore, InvoiceState,
    MemoryDocumentStorage, SendOutcome, TariffConfig, OVERDUE_BLOCK_REASON,
};
use relay_billing::error::BillingError;
use uuid::Uuid;

struct Harness {
    service: BillingService,
    store: Arc<InMemoryBillingStore>,
    documents: Arc<MemoryDocumentStorage>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryBillingStore::new());
    let documents = Arc::new(MemoryDocumentStorage::new());
    let service = BillingService::new(
        store.clone(),
        store.clone(),
        documents.clone(),
        Arc::new(TariffConfig::default()),
    );
    Harness {
        service,
        store,
        documents,
    }
}

fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn january() -> BillingPeriod {
    BillingPeriod::new(2026, 1).unwrap()
}

async fn seed(store: &InMemoryBillingStore, channel: Channel, count: usize, recipients: i32) {
    for _ in 0..count {
        store
            .seed_record(channel, january(), SendOutcome::Sent, recipients)
            .await;
    }
}

// key: billing-tests -> tariff end-to-end
#[tokio::test]
async fn chat_overage_is_billed_per_message_above_free_units() {
    let h = harness();
    seed(&h.store, Channel::Chat, 1200, 1).await;

    let invoice = h
        .service
        .generate(Some(january()), utc(2026, 2, 1, 0))
        .await
        .unwrap();

    assert_eq!(invoice.period, january());
    assert_eq!(invoice.state, InvoiceState::Invoiced);
    assert_eq!(invoice.chat_sent_count, 1200);
    assert_eq!(invoice.chat_overage_units, 200);
    assert_eq!(invoice.chat_overage_cost_cents, 2000);
    assert_eq!(invoice.total_cost_cents, 10000 + 2000);
    assert!(!invoice.document_present);
    assert!(!invoice.payment_received);
}

#[tokio::test]
async fn mail_overage_counts_recipients_not_sends() {
    let h = harness();
    for recipients in [300, 150, 100] {
        seed(&h.store, Channel::Mail, 1, recipients).await;
    }
    h.store
        .seed_record(Channel::Mail, january(), SendOutcome::Failed, 400)
        .await;

    let invoice = h
        .service
        .generate(Some(january()), utc(2026, 2, 1, 0))
        .await
        .unwrap();

    assert_eq!(invoice.mail_recipient_count, 550);
    assert_eq!(invoice.mail_overage_units, 50);
    assert_eq!(invoice.mail_overage_cost_cents, 50 * 15);
    assert_eq!(invoice.chat_overage_cost_cents, 0);
}

#[tokio::test]
async fn empty_period_costs_only_the_base_plan() {
    let h = harness();
    let invoice = h
        .service
        .generate(Some(BillingPeriod::new(2031, 7).unwrap()), Utc::now())
        .await
        .unwrap();
    assert_eq!(invoice.chat_sent_count, 0);
    assert_eq!(invoice.mail_recipient_count, 0);
    assert_eq!(invoice.total_cost_cents, 10000);
}

#[tokio::test]
async fn generate_defaults_to_previous_month() {
    let h = harness();
    let invoice = h.service.generate(None, utc(2026, 1, 1, 0)).await.unwrap();
    assert_eq!(invoice.period.to_string(), "2025-12");
}

#[tokio::test]
async fn second_generate_reports_the_stored_invoice_unchanged() {
    let h = harness();
    seed(&h.store, Channel::Chat, 3, 1).await;
    let first = h
        .service
        .generate(Some(january()), utc(2026, 2, 1, 0))
        .await
        .unwrap();

    seed(&h.store, Channel::Chat, 5, 1).await;
    let err = h
        .service
        .generate(Some(january()), utc(2026, 2, 2, 0))
        .await
        .unwrap_err();

    match err {
        BillingError::AlreadyGenerated(existing) => assert_eq!(*existing, first),
        other => panic!("expected AlreadyGenerated, got {other:?}"),
    }
    assert_eq!(h.service.invoice(january()).await.unwrap(), first);
}

#[tokio::test]
async fn concurrent_generates_create_one_invoice() {
    let h = harness();
    let now = utc(2026, 2, 1, 0);
    let (a, b) = tokio::join!(
        h.service.generate(Some(january()), now),
        h.service.generate(Some(january()), now)
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(h.service.invoices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn upload_on_friday_is_due_the_following_wednesday() {
    let h = harness();
    let invoice = h
        .service
        .generate(Some(january()), utc(2026, 2, 1, 0))
        .await
        .unwrap();

    let friday = utc(2026, 1, 9, 10);
    let updated = h
        .service
        .attach_document(invoice.id, b"%PDF-1.4", Some("../january.pdf"), friday)
        .await
        .unwrap();

    assert!(updated.document_present);
    assert_eq!(updated.state, InvoiceState::Invoiced);
    assert_eq!(updated.payment_due_at, Some(utc(2026, 1, 14, 10)));
    assert_eq!(updated.document_filename.as_deref(), Some("january.pdf"));
    let document_ref = updated.document_ref.unwrap();
    assert_eq!(
        h.documents.get(&document_ref).await.as_deref(),
        Some(&b"%PDF-1.4"[..])
    );
}

#[tokio::test]
async fn replacing_a_document_discards_the_previous_file() {
    let h = harness();
    let invoice = h.service.generate(Some(january()), Utc::now()).await.unwrap();
    h.service
        .attach_document(invoice.id, b"one", Some("a.pdf"), Utc::now())
        .await
        .unwrap();
    h.service
        .attach_document(invoice.id, b"two", Some("b.pdf"), Utc::now())
        .await
        .unwrap();
    assert_eq!(h.documents.len().await, 1);
}

#[tokio::test]
async fn attach_to_unknown_invoice_is_not_found() {
    let h = harness();
    let err = h
        .service
        .attach_document(Uuid::new_v4(), b"%PDF", None, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound));
    assert_eq!(h.documents.len().await, 0);
}

#[tokio::test]
async fn removing_the_document_reverts_to_draft_and_allows_regeneration() {
    let h = harness();
    let invoice = h.service.generate(Some(january()), Utc::now()).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, Utc::now())
        .await
        .unwrap();

    let draft = h
        .service
        .remove_document(invoice.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(draft.state, InvoiceState::Draft);
    assert!(!draft.document_present);
    assert_eq!(draft.payment_due_at, None);
    assert_eq!(h.documents.len().await, 0);

    let err = h
        .service
        .attach_document(invoice.id, b"%PDF", None, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotGenerated));

    seed(&h.store, Channel::Chat, 1001, 1).await;
    let regenerated = h.service.generate(Some(january()), Utc::now()).await.unwrap();
    assert_eq!(regenerated.id, invoice.id);
    assert_eq!(regenerated.state, InvoiceState::Invoiced);
    assert_eq!(regenerated.chat_overage_units, 1);
}

#[tokio::test]
async fn reverse_requires_no_document_and_no_payment() {
    let h = harness();
    let now = Utc::now();

    let invoice = h.service.generate(Some(january()), now).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, now)
        .await
        .unwrap();
    let err = h.service.reverse(january(), now).await.unwrap_err();
    assert!(matches!(err, BillingError::AlreadyUploaded));

    h.service.confirm_payment(january(), now).await.unwrap();
    let err = h.service.reverse(january(), now).await.unwrap_err();
    assert!(matches!(err, BillingError::AlreadyPaid));

    let february = BillingPeriod::new(2026, 2).unwrap();
    h.service.generate(Some(february), now).await.unwrap();
    let deleted = h.service.reverse(february, now).await.unwrap();
    assert_eq!(deleted.period, february);
    assert!(matches!(
        h.service.invoice(february).await,
        Err(BillingError::NotFound)
    ));
    assert!(matches!(
        h.service.reverse(february, now).await,
        Err(BillingError::NotFound)
    ));
}

#[tokio::test]
async fn sweep_before_due_date_never_blocks() {
    let h = harness();
    let uploaded = utc(2026, 2, 2, 9);
    let invoice = h.service.generate(Some(january()), uploaded).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, uploaded)
        .await
        .unwrap();

    let report = h
        .service
        .reconcile_overdue(uploaded + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.count, 0);
    assert!(!report.account_blocked);
    assert!(h.service.gate().is_active(Utc::now()).await.unwrap());
}

#[tokio::test]
async fn sweep_after_due_date_flags_invoice_and_blocks_account() {
    let h = harness();
    let uploaded = utc(2026, 2, 2, 9);
    let invoice = h.service.generate(Some(january()), uploaded).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, uploaded)
        .await
        .unwrap();

    let late = utc(2026, 2, 6, 8);
    let report = h.service.reconcile_overdue(late).await.unwrap();
    assert_eq!(report.count, 1);
    assert!(report.account_blocked);
    assert_eq!(report.invoices[0].state, InvoiceState::Overdue);

    let status = h.service.account_status(late).await.unwrap();
    assert!(!status.is_active);
    assert_eq!(status.blocked_reason.as_deref(), Some(OVERDUE_BLOCK_REASON));

    let again = h
        .service
        .reconcile_overdue(late + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(again.count, 1);

    let paid = h.service.confirm_payment(january(), late).await.unwrap();
    assert_eq!(paid.state, InvoiceState::Paid);
    assert!(paid.payment_received);
    assert!(h.service.gate().is_active(late).await.unwrap());

    let after_payment = h
        .service
        .reconcile_overdue(late + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(after_payment.count, 0);
    assert!(h.service.gate().is_active(late).await.unwrap());
}

#[tokio::test]
async fn payment_unblocks_even_with_other_overdue_periods() {
    let h = harness();
    let uploaded = utc(2026, 3, 2, 9);
    let february = BillingPeriod::new(2026, 2).unwrap();
    for period in [january(), february] {
        let invoice = h.service.generate(Some(period), uploaded).await.unwrap();
        h.service
            .attach_document(invoice.id, b"%PDF", None, uploaded)
            .await
            .unwrap();
    }

    let late = uploaded + Duration::days(10);
    assert_eq!(h.service.reconcile_overdue(late).await.unwrap().count, 2);

    h.service.confirm_payment(january(), late).await.unwrap();
    assert!(h.service.gate().is_active(late).await.unwrap());

    let next_day = h
        .service
        .reconcile_overdue(late + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(next_day.count, 1);
    assert!(!h.service.gate().is_active(late).await.unwrap());
}

#[tokio::test]
async fn reversing_the_only_overdue_invoice_unblocks() {
    let h = harness();
    let uploaded = utc(2026, 2, 2, 9);
    let invoice = h.service.generate(Some(january()), uploaded).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, uploaded)
        .await
        .unwrap();
    let late = uploaded + Duration::days(7);
    h.service.reconcile_overdue(late).await.unwrap();
    assert!(!h.service.gate().is_active(late).await.unwrap());

    let cleared = h.service.remove_document(invoice.id, late).await.unwrap();
    assert_eq!(cleared.state, InvoiceState::Overdue);

    h.service.reverse(january(), late).await.unwrap();
    assert!(h.service.gate().is_active(late).await.unwrap());
}

#[tokio::test]
async fn reversal_keeps_block_while_another_invoice_is_overdue() {
    let h = harness();
    let uploaded = utc(2026, 3, 2, 9);
    let february = BillingPeriod::new(2026, 2).unwrap();
    let mut invoices = Vec::new();
    for period in [january(), february] {
        let invoice = h.service.generate(Some(period), uploaded).await.unwrap();
        h.service
            .attach_document(invoice.id, b"%PDF", None, uploaded)
            .await
            .unwrap();
        invoices.push(invoice);
    }
    let late = uploaded + Duration::days(10);
    assert_eq!(h.service.reconcile_overdue(late).await.unwrap().count, 2);

    h.service.remove_document(invoices[0].id, late).await.unwrap();
    let reversed = h.service.reverse(january(), late).await.unwrap();
    assert_eq!(reversed.id, invoices[0].id);

    let status = h.service.account_status(late).await.unwrap();
    assert!(!status.is_active);
    assert_eq!(status.blocked_reason.as_deref(), Some(OVERDUE_BLOCK_REASON));
    assert_eq!(
        h.service.invoice(february).await.unwrap().state,
        InvoiceState::Overdue
    );
}

#[tokio::test]
async fn paid_invoice_keeps_its_document() {
    let h = harness();
    let invoice = h.service.generate(Some(january()), Utc::now()).await.unwrap();
    h.service
        .attach_document(invoice.id, b"%PDF", None, Utc::now())
        .await
        .unwrap();
    h.service.confirm_payment(january(), Utc::now()).await.unwrap();

    let err = h
        .service
        .remove_document(invoice.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyPaid));
    assert_eq!(h.documents.len().await, 1);
}

#[tokio::test]
async fn confirm_payment_for_missing_period_is_not_found() {
    let h = harness();
    let err = h
        .service
        .confirm_payment(january(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound));
}

#[tokio::test]
async fn summary_and_period_stats_report_usage() {
    let h = harness();
    let now = utc(2026, 1, 20, 12);
    seed(&h.store, Channel::Chat, 4, 1).await;
    seed(&h.store, Channel::Mail, 2, 10).await;
    h.store
        .seed_record(Channel::Chat, january(), SendOutcome::Failed, 1)
        .await;

    let usage = h.service.current_usage(now).await.unwrap();
    assert_eq!(usage.period, january());
    assert_eq!(usage.chat.sent, 4);
    assert_eq!(usage.chat.remaining, 996);
    assert_eq!(usage.mail.sent, 20);
    assert_eq!(usage.mail.extra, 0);

    let summary = h.service.summary(now).await.unwrap();
    assert!(summary.account.active);
    assert!(summary.last_invoice.is_none());

    h.service.generate(Some(january()), now).await.unwrap();
    let stats = h.service.period_stats(january()).await.unwrap();
    let sent_chat = stats
        .chat
        .iter()
        .find(|t| t.outcome == SendOutcome::Sent)
        .unwrap();
    assert_eq!(sent_chat.records, 4);
    let failed_chat = stats
        .chat
        .iter()
        .find(|t| t.outcome == SendOutcome::Failed)
        .unwrap();
    assert_eq!(failed_chat.records, 1);
    assert_eq!(stats.mail[0].recipients, 20);
    assert!(stats.invoice.is_some());

    let summary = h.service.summary(now).await.unwrap();
    assert_eq!(summary.last_invoice.unwrap().period, january());
}
