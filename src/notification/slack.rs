use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::Notifier;
use crate::models::access::AccessGrant;

/// Posts notifications to a Slack incoming webhook. With no URL configured
/// every call is a no-op. Each post is bounded by `timeout`.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    async fn post(&self, text: String) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let resp = self
            .client
            .post(url)
            .json(&SlackMessage { text })
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn access_revoked(&self, grant: &AccessGrant) -> anyhow::Result<()> {
        self.post(format!(
            "🔒 *Access revoked*\n\nAccess: `{}`\nProperty: `{}`\nGuest: `{}`\nWas valid until: {}",
            grant.id, grant.property_id, grant.user_id, grant.end_date
        ))
        .await?;
        tracing::info!(access_id = %grant.id, "sent Slack notification for revoked access");
        Ok(())
    }

    async fn low_battery(&self, property_id: Uuid, battery_level: u8) -> anyhow::Result<()> {
        self.post(format!(
            "🔋 *Lock battery low*\n\nProperty: `{}`\nBattery: {}%",
            property_id, battery_level
        ))
        .await?;
        tracing::info!(%property_id, battery_level, "sent Slack low-battery notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}
