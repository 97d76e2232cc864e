use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::Channel;

/// Payload handed to a channel transport.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl OutboundMessage {
    pub fn chat(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: Channel::Chat,
            to: vec![to.into()],
            subject: None,
            body: message.into(),
        }
    }

    pub fn mail(to: Vec<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            channel: Channel::Mail,
            to,
            subject: Some(subject.into()),
            body: html.into(),
        }
    }

    pub fn recipient_count(&self) -> i32 {
        i32::try_from(self.to.len()).unwrap_or(i32::MAX).max(1)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// key: dispatch-transport -> one network attempt per call
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt>;
}

/// Posts messages as JSON to an HTTP relay fronting the real chat or mail sender.
#[derive(Clone)]
pub struct HttpRelayTransport {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RelayResponse {
    #[serde(default, alias = "messageId")]
    message_id: Option<String>,
}

impl HttpRelayTransport {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build relay client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token,
        })
    }
}

#[async_trait]
impl ChannelTransport for HttpRelayTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("failed to contact relay")?
            .error_for_status()
            .context("relay rejected message")?;

        // Relays may answer with an empty body.
        let parsed = response.json::<RelayResponse>().await.unwrap_or_default();
        Ok(DeliveryReceipt {
            message_id: parsed.message_id,
            sent_at: Utc::now(),
        })
    }
}

/// Stand-in used when no relay is configured for a channel; every attempt fails.
#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredTransport {
    pub channel: Channel,
}

#[async_trait]
impl ChannelTransport for UnconfiguredTransport {
    async fn deliver(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt> {
        bail!("{} relay is not configured", self.channel.as_str())
    }
}
