use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Payload handed to the link delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invitation {
    pub event: String,
    pub participant_id: Uuid,
    pub session_id: Uuid,
    pub session_name: String,
    pub session_code: String,
    pub name: String,
    pub email: Option<String>,
    pub unique_link: String,
    pub link_expires_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkNotifier: Send + Sync {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<()>;
}

/// Used when no delivery endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinkNotifier;

#[async_trait]
impl LinkNotifier for NoopLinkNotifier {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<()> {
        tracing::debug!(
            participant_id = %invitation.participant_id,
            "invitation delivery disabled, skipping"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct WebhookLinkNotifier {
    client: Client,
    target_url: String,
    secret: String,
}

impl WebhookLinkNotifier {
    pub fn new(client: Client, target_url: String, secret: String) -> Self {
        Self {
            client,
            target_url,
            secret,
        }
    }
}

#[async_trait]
impl LinkNotifier for WebhookLinkNotifier {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<()> {
        let resp = self
            .client
            .post(&self.target_url)
            .header("X-Webhook-Secret", &self.secret)
            .json(invitation)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "invitation webhook returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}
