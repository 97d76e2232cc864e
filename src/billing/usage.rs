use std::sync::Arc;

use super::models::{Channel, UsageSnapshot};
use super::period::BillingPeriod;
use super::store::SendRecordStore;

/// key: billing-usage-aggregator -> sent records to monthly totals
#[derive(Clone)]
pub struct UsageAggregator {
    records: Arc<dyn SendRecordStore>,
}

impl UsageAggregator {
    pub fn new(records: Arc<dyn SendRecordStore>) -> Self {
        Self { records }
    }

    /// Chat usage counts sent records; mail usage sums their recipients.
    pub async fn aggregate(&self, period: BillingPeriod) -> sqlx::Result<UsageSnapshot> {
        let chat_sent_count = self.records.count_sent(Channel::Chat, period).await?;
        let mail_recipient_count = self
            .records
            .find_sent(Channel::Mail, period)
            .await?
            .iter()
            .map(|record| i64::from(record.recipient_count))
            .sum();

        Ok(UsageSnapshot {
            billing_period: period,
            chat_sent_count,
            mail_recipient_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::InMemoryBillingStore;
    use crate::billing::models::SendOutcome;

    #[tokio::test]
    async fn empty_period_yields_zero_counts() {
        let store = Arc::new(InMemoryBillingStore::new());
        let aggregator = UsageAggregator::new(store);
        let snapshot = aggregator
            .aggregate(BillingPeriod::new(2030, 6).unwrap())
            .await
            .unwrap();
        assert_eq!(snapshot.chat_sent_count, 0);
        assert_eq!(snapshot.mail_recipient_count, 0);
    }

    #[tokio::test]
    async fn only_sent_records_in_period_count() {
        let store = Arc::new(InMemoryBillingStore::new());
        let january = BillingPeriod::new(2026, 1).unwrap();
        let february = BillingPeriod::new(2026, 2).unwrap();

        store.seed_record(Channel::Chat, january, SendOutcome::Sent, 1).await;
        store.seed_record(Channel::Chat, january, SendOutcome::Sent, 1).await;
        store.seed_record(Channel::Chat, january, SendOutcome::Failed, 1).await;
        store.seed_record(Channel::Chat, january, SendOutcome::Pending, 1).await;
        store.seed_record(Channel::Chat, february, SendOutcome::Sent, 1).await;
        store.seed_record(Channel::Mail, january, SendOutcome::Sent, 300).await;
        store.seed_record(Channel::Mail, january, SendOutcome::Sent, 150).await;
        store.seed_record(Channel::Mail, january, SendOutcome::Sent, 100).await;
        store.seed_record(Channel::Mail, january, SendOutcome::Failed, 40).await;

        let aggregator = UsageAggregator::new(store);
        let first = aggregator.aggregate(january).await.unwrap();
        assert_eq!(first.chat_sent_count, 2);
        assert_eq!(first.mail_recipient_count, 550);

        let second = aggregator.aggregate(january).await.unwrap();
        assert_eq!(first, second);
    }
}
