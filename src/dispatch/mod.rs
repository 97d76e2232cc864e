pub mod api;
pub mod retry;
pub mod transport;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::{
    AccountGate, BillingPeriod, Channel, NewSendRecord, SendOutcome, SendRecordStore,
};
use crate::error::DispatchError;

pub use retry::{RetryExhausted, RetryPolicy};
pub use transport::{
    ChannelTransport, DeliveryReceipt, HttpRelayTransport, OutboundMessage, UnconfiguredTransport,
};

/// Outcome of a delivered send, as reported to the caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SendReport {
    pub record_id: Uuid,
    pub channel: Channel,
    pub billing_period: BillingPeriod,
    pub recipients: Vec<String>,
    pub recipient_count: i32,
    pub message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// key: dispatch -> gated, recorded, retried outbound sends
#[derive(Clone)]
pub struct Dispatcher {
    gate: AccountGate,
    records: Arc<dyn SendRecordStore>,
    chat: Arc<dyn ChannelTransport>,
    mail: Arc<dyn ChannelTransport>,
    chat_retry: RetryPolicy,
    mail_retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        gate: AccountGate,
        records: Arc<dyn SendRecordStore>,
        chat: Arc<dyn ChannelTransport>,
        mail: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            gate,
            records,
            chat,
            mail,
            chat_retry: RetryPolicy::no_retry(),
            mail_retry: RetryPolicy::no_retry(),
        }
    }

    pub fn with_retry(mut self, chat: RetryPolicy, mail: RetryPolicy) -> Self {
        self.chat_retry = chat;
        self.mail_retry = mail;
        self
    }

    pub async fn send_chat(
        &self,
        to: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<SendReport, DispatchError> {
        self.dispatch(OutboundMessage::chat(to, message), now).await
    }

    pub async fn send_mail(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        now: DateTime<Utc>,
    ) -> Result<SendReport, DispatchError> {
        self.dispatch(OutboundMessage::mail(vec![to.to_string()], subject, html), now)
            .await
    }

    /// One send to every address in `to`; billed as `to.len()` mail units.
    pub async fn send_mail_multiple(
        &self,
        to: Vec<String>,
        subject: &str,
        html: &str,
        now: DateTime<Utc>,
    ) -> Result<SendReport, DispatchError> {
        self.dispatch(OutboundMessage::mail(to, subject, html), now).await
    }

    async fn dispatch(
        &self,
        message: OutboundMessage,
        now: DateTime<Utc>,
    ) -> Result<SendReport, DispatchError> {
        let status = self.gate.status(now).await?;
        if !status.is_active {
            warn!(
                channel = message.channel.as_str(),
                reason = ?status.blocked_reason,
                "send rejected, account blocked"
            );
            return Err(DispatchError::AccountBlocked {
                reason: status.blocked_reason,
            });
        }

        let billing_period = BillingPeriod::containing(now);
        let record = self
            .records
            .record_attempt(NewSendRecord {
                channel: message.channel,
                billing_period,
                recipient_count: message.recipient_count(),
                created_at: now,
            })
            .await?;

        let (transport, policy) = match message.channel {
            Channel::Chat => (&self.chat, self.chat_retry),
            Channel::Mail => (&self.mail, self.mail_retry),
        };
        let outbound = &message;
        let delivery = policy
            .run(message.channel.as_str(), move |_| transport.deliver(outbound))
            .await;

        match delivery {
            Ok(receipt) => {
                // Delivered is final; a failed bookkeeping write leaves the record pending.
                if let Err(err) = self
                    .records
                    .complete_attempt(record.id, SendOutcome::Sent, None, receipt.sent_at)
                    .await
                {
                    error!(
                        ?err,
                        record = %record.id,
                        channel = message.channel.as_str(),
                        "delivered message could not be marked sent"
                    );
                }
                self.note_chat_connection(message.channel, true).await;
                info!(
                    channel = message.channel.as_str(),
                    record = %record.id,
                    recipients = record.recipient_count,
                    period = %billing_period,
                    "message sent"
                );
                Ok(SendReport {
                    record_id: record.id,
                    channel: message.channel,
                    billing_period,
                    recipient_count: record.recipient_count,
                    recipients: message.to,
                    message_id: receipt.message_id,
                    sent_at: receipt.sent_at,
                })
            }
            Err(RetryExhausted { attempts, error }) => {
                let reason = format!("{error:#}");
                if let Err(err) = self
                    .records
                    .complete_attempt(
                        record.id,
                        SendOutcome::Failed,
                        Some(reason.clone()),
                        Utc::now(),
                    )
                    .await
                {
                    error!(?err, record = %record.id, "failed send could not be recorded");
                }
                self.note_chat_connection(message.channel, false).await;
                Err(DispatchError::Delivery {
                    attempts,
                    message: reason,
                })
            }
        }
    }

    async fn note_chat_connection(&self, channel: Channel, connected: bool) {
        if channel != Channel::Chat {
            return;
        }
        if let Err(err) = self.gate.record_channel_connection(connected, Utc::now()).await {
            warn!(?err, "failed to record chat connection state");
        }
    }
}
