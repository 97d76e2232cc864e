pub mod api;
pub mod documents;
pub mod gate;
pub mod memory;
pub mod models;
pub mod period;
pub mod postgres;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tariff;
pub mod usage;

pub use documents::{DocumentStorage, FsDocumentStorage, MemoryDocumentStorage};
pub use gate::AccountGate;
pub use memory::InMemoryBillingStore;
pub use models::{
    AccountStatus, AccountView, BillingSummary, Channel, ChannelUsage, CostBreakdown,
    CurrentUsage, Invoice, InvoiceState, InvoiceSummary, NewSendRecord, OutcomeTally,
    OverdueReport, PageRequest, Pagination, PeriodStats, RecordFilter, SendHistory, SendOutcome,
    SendRecord, TariffConfig, UsageSnapshot,
};
pub use period::{add_business_days, BillingPeriod, PeriodParseError};
pub use postgres::PgBillingStore;
pub use scheduler::{
    process_invoice_tick, process_overdue_tick, spawn as spawn_billing_scheduler, SweepSchedule,
};
pub use service::{BillingService, OVERDUE_BLOCK_REASON, PAYMENT_TERMS_BUSINESS_DAYS};
pub use store::{BillingStore, SendRecordStore};
pub use tariff::price;
pub use usage::UsageAggregator;
