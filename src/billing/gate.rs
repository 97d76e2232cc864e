use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use super::models::AccountStatus;
use super::store::BillingStore;

/// key: billing-account-gate -> activity check before every outbound send
///
/// All read-modify-write cycles on the account singleton go through `guard`,
/// so a block racing an unblock never interleaves field updates.
#[derive(Clone)]
pub struct AccountGate {
    store: Arc<dyn BillingStore>,
    guard: Arc<Mutex<()>>,
}

impl AccountGate {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            store,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub async fn status(&self, now: DateTime<Utc>) -> sqlx::Result<AccountStatus> {
        self.store.account_status(now).await
    }

    pub async fn is_active(&self, now: DateTime<Utc>) -> sqlx::Result<bool> {
        Ok(self.status(now).await?.is_active)
    }

    /// Deactivates the account. Repeated calls overwrite the reason.
    pub async fn block(&self, reason: &str, now: DateTime<Utc>) -> sqlx::Result<AccountStatus> {
        let _held = self.guard.lock().await;
        let mut status = self.store.account_status(now).await?;
        let was_active = status.is_active;
        status.is_active = false;
        status.blocked_reason = Some(reason.to_string());
        status.blocked_at = Some(now);
        status.updated_at = now;
        self.store.save_account_status(&status).await?;
        if was_active {
            info!(%reason, "account blocked");
        }
        Ok(status)
    }

    /// Reactivates the account; a no-op when it is already active.
    pub async fn unblock(&self, now: DateTime<Utc>) -> sqlx::Result<AccountStatus> {
        let _held = self.guard.lock().await;
        let mut status = self.store.account_status(now).await?;
        if status.is_active {
            return Ok(status);
        }
        status.is_active = true;
        status.blocked_reason = None;
        status.updated_at = now;
        self.store.save_account_status(&status).await?;
        info!("account unblocked");
        Ok(status)
    }

    /// Informational connection flag reported by the chat client.
    pub async fn record_channel_connection(
        &self,
        connected: bool,
        now: DateTime<Utc>,
    ) -> sqlx::Result<AccountStatus> {
        let _held = self.guard.lock().await;
        let mut status = self.store.account_status(now).await?;
        status.channel_connected = connected;
        status.channel_checked_at = Some(now);
        status.updated_at = now;
        self.store.save_account_status(&status).await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::InMemoryBillingStore;

    fn gate() -> AccountGate {
        AccountGate::new(Arc::new(InMemoryBillingStore::new()))
    }

    #[tokio::test]
    async fn status_is_lazily_active() {
        let gate = gate();
        assert!(gate.is_active(Utc::now()).await.unwrap());
        assert_eq!(gate.status(Utc::now()).await.unwrap().blocked_reason, None);
    }

    #[tokio::test]
    async fn block_overwrites_reason_and_unblock_clears_it() {
        let gate = gate();
        let now = Utc::now();
        gate.block("first", now).await.unwrap();
        let status = gate.block("second", now).await.unwrap();
        assert!(!status.is_active);
        assert_eq!(status.blocked_reason.as_deref(), Some("second"));

        let status = gate.unblock(now).await.unwrap();
        assert!(status.is_active);
        assert_eq!(status.blocked_reason, None);

        let again = gate.unblock(now).await.unwrap();
        assert_eq!(again, status);
    }

    #[tokio::test]
    async fn channel_flag_does_not_touch_activity() {
        let gate = gate();
        let now = Utc::now();
        gate.block("overdue", now).await.unwrap();
        let status = gate.record_channel_connection(true, now).await.unwrap();
        assert!(status.channel_connected);
        assert!(!status.is_active);
    }
}
